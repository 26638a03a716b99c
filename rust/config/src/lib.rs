//! Configuration types shared between the AlgoPerf crates.

mod types;
mod workload;

pub use types::*;
pub use workload::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_order() {
        let names: Vec<_> = builtin_workloads().into_iter().map(|w| w.name).collect();
        assert_eq!(
            names,
            vec![
                "imagenet_resnet",
                "imagenet_vit",
                "fastmri",
                "ogbg",
                "wmt",
                "librispeech_deepspeech",
                "criteo1tb",
                "librispeech_conformer",
            ]
        );
    }

    #[test]
    fn test_builtin_datasets() {
        let resnet = find_builtin("imagenet_resnet").unwrap();
        assert_eq!(resnet.max_steps, 186_666);
        assert_eq!(resnet.dataset, Dataset::Imagenet);

        let conformer = find_builtin("librispeech_conformer").unwrap();
        assert_eq!(conformer.dataset, Dataset::Librispeech);

        assert!(find_builtin("mnist").is_none());
    }

    #[test]
    fn test_step_budget_example() {
        let resnet = find_builtin("imagenet_resnet").unwrap();
        let ten = RunPercentage::new(10).unwrap();
        assert_eq!(resnet.step_budget(ten), 18_666);
        assert_eq!(resnet.step_budget(RunPercentage::FULL), 186_666);
    }

    #[test]
    fn test_step_budget_floors_over_full_range() {
        for workload in builtin_workloads() {
            for pct in 0..=100u8 {
                let budget = workload.step_budget(RunPercentage::new(pct).unwrap());
                assert_eq!(budget, workload.max_steps * u64::from(pct) / 100);
                assert!(budget <= workload.max_steps);
            }
        }
    }

    #[test]
    fn test_step_budget_zero_percent() {
        let criteo = find_builtin("criteo1tb").unwrap();
        assert_eq!(criteo.step_budget(RunPercentage::new(0).unwrap()), 0);
    }

    #[test]
    fn test_run_percentage_bounds() {
        assert!(RunPercentage::new(100).is_ok());
        assert!(RunPercentage::new(101).is_err());
        assert_eq!("25".parse::<RunPercentage>().unwrap().get(), 25);
        assert_eq!("25%".parse::<RunPercentage>().unwrap().get(), 25);
        assert!("-1".parse::<RunPercentage>().is_err());
        assert!("150".parse::<RunPercentage>().is_err());
        assert!("ten".parse::<RunPercentage>().is_err());
    }

    #[test]
    fn test_run_percentage_serde() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            pct: RunPercentage,
        }

        let ok: Wrapper = toml::from_str("pct = 40").unwrap();
        assert_eq!(ok.pct.get(), 40);
        assert!(toml::from_str::<Wrapper>("pct = 140").is_err());
        assert_eq!(serde_json::to_string(&ok.pct).unwrap(), "40");
    }

    #[test]
    fn test_enum_serde() {
        assert_eq!(
            serde_json::from_str::<Framework>("\"pytorch\"").unwrap(),
            Framework::Pytorch
        );
        assert_eq!(
            serde_json::from_str::<Dataset>("\"criteo1tb\"").unwrap(),
            Dataset::Criteo1tb
        );
    }

    #[test]
    fn test_framework_from_str() {
        assert_eq!("JAX".parse::<Framework>().unwrap(), Framework::Jax);
        assert_eq!("torch".parse::<Framework>().unwrap(), Framework::Pytorch);
        assert!("tensorflow".parse::<Framework>().is_err());
    }

    #[test]
    fn test_dataset_display_roundtrip() {
        for dataset in Dataset::ALL {
            assert_eq!(dataset.to_string().parse::<Dataset>().unwrap(), dataset);
        }
    }

    #[test]
    fn test_workload_from_toml() {
        #[derive(serde::Deserialize)]
        struct Table {
            workloads: Vec<WorkloadSpec>,
        }

        let table: Table = toml::from_str(
            r#"
[[workloads]]
name = "ogbg"
max_steps = 80000
dataset = "ogbg"
"#,
        )
        .unwrap();
        assert_eq!(table.workloads, vec![find_builtin("ogbg").unwrap()]);
    }
}
