//! Building and issuing the container command for one workload.

use algoperf_config::{Dataset, Framework, WorkloadSpec};
use serde::{Deserialize, Serialize};

use crate::{
    config::{LauncherConfig, RunOptions},
    docker::Host,
};

/// The `docker run` invocation for one workload.
#[derive(Debug, Clone)]
pub struct DockerRunCommand<'a> {
    config: &'a LauncherConfig,
    workload: &'a WorkloadSpec,
}

impl<'a> DockerRunCommand<'a> {
    #[must_use]
    pub fn new(config: &'a LauncherConfig, workload: &'a WorkloadSpec) -> Self {
        Self { config, workload }
    }

    /// Step budget after applying the run percentage.
    #[must_use]
    pub fn max_steps(&self) -> u64 {
        self.workload.step_budget(self.config.run.run_percentage)
    }

    /// Command-line arguments, starting with the engine binary.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let run = &self.config.run;
        let mounts = &self.config.host.mounts;

        let mut args: Vec<String> = vec![
            self.config.host.docker_binary.clone(),
            "run".into(),
            "-t".into(),
            "-d".into(),
            "-v".into(),
            format!("{}:/data/", mounts.data_dir),
            "-v".into(),
            format!("{}:/experiment_runs", mounts.experiment_dir),
            "-v".into(),
            format!("{}:/logs", mounts.logs_dir),
        ];
        if run.local {
            args.extend(["-v".into(), format!("{}:/algorithmic-efficiency", mounts.repo_dir)]);
        }
        args.extend(["--gpus".into(), "all".into(), "--ipc=host".into()]);
        args.push(run.image_ref());

        // everything after the image goes to the container entrypoint
        args.extend([
            "-d".into(),
            self.workload.dataset.to_string(),
            "-f".into(),
            run.framework.to_string(),
            "-s".into(),
            run.submission_path.clone(),
            "-w".into(),
            self.workload.name.clone(),
            "-t".into(),
            run.tuning_search_space.clone(),
            "-e".into(),
            run.experiment_name(),
            "-m".into(),
            self.max_steps().to_string(),
            "-c".into(),
            "false".into(),
            "-o".into(),
            "true".into(),
            "-r".into(),
            run.rsync_data.to_string(),
            "-i".into(),
            "true".into(),
        ]);
        args
    }

    /// Single shell command string.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_args().join(" ")
    }
}

/// What happened when one workload was launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub workload: String,
    pub dataset: Dataset,
    pub framework: Framework,
    pub algorithm: String,
    pub experiment_name: String,
    pub max_steps: u64,
    pub command: String,
    /// Exit code of the launch command. Always `Some(0)` in dry-run mode.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub dry_run: bool,
    /// Set when the shell itself could not be started.
    pub error: Option<String>,
    pub launched_at: String,
}

/// Launches single workloads on a host.
pub struct Runner<'a, H> {
    config: &'a LauncherConfig,
    host: &'a H,
}

impl<'a, H: Host> Runner<'a, H> {
    #[must_use]
    pub fn new(config: &'a LauncherConfig, host: &'a H) -> Self {
        Self { config, host }
    }

    /// Issue the launch command for `workload` and log the result.
    ///
    /// Failures are recorded in the outcome, never returned: one bad
    /// workload must not stop the rest of the table.
    pub async fn launch(&self, workload: &WorkloadSpec) -> LaunchOutcome {
        let run: &RunOptions = &self.config.run;
        let cmd = DockerRunCommand::new(self.config, workload);
        let command = cmd.render();
        let experiment_name = run.experiment_name();
        let launched_at = now_timestamp();

        let (exit_code, error) = if run.dry_run {
            println!("{command}");
            (Some(0), None)
        } else {
            println!("Running docker container command");
            println!("Container ID: ");
            match self.host.run_shell(&command).await {
                Ok(code) => (code, None),
                Err(e) => (None, Some(e.to_string())),
            }
        };

        let success = exit_code == Some(0);
        if success {
            tracing::info!(
                "SUCCESS: container for {} {} {} launched successfully",
                run.framework,
                workload.name,
                run.algorithm
            );
            tracing::info!("Command: {command}");
            tracing::info!("Results will be logged to {experiment_name}");
        } else {
            let reason = match (exit_code, &error) {
                (Some(code), _) => format!("exit code {code}"),
                (None, Some(e)) => e.clone(),
                (None, None) => "termination by signal".to_string(),
            };
            tracing::error!(
                "Failed: container for {} {} {} failed with {reason}.",
                run.framework,
                workload.name,
                run.algorithm
            );
            tracing::error!("Command: {command}");
        }

        LaunchOutcome {
            workload: workload.name.clone(),
            dataset: workload.dataset,
            framework: run.framework,
            algorithm: run.algorithm.clone(),
            experiment_name,
            max_steps: cmd.max_steps(),
            command,
            exit_code,
            success,
            dry_run: run.dry_run,
            error,
            launched_at,
        }
    }
}

/// Local time formatted for reports.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use algoperf_config::{RunPercentage, find_builtin};

    use super::*;
    use crate::config::DEFAULT_DOCKER_IMAGE_URL;

    fn config(local: bool) -> LauncherConfig {
        let mut run = RunOptions::new(Framework::Jax, "nadamw");
        run.run_percentage = RunPercentage::new(10).unwrap();
        run.tag = Some("latest".to_string());
        run.local = local;
        LauncherConfig::new(run)
    }

    #[test]
    fn test_render_matches_expected_shape() {
        let config = config(false);
        let workload = find_builtin("imagenet_resnet").unwrap();
        let cmd = DockerRunCommand::new(&config, &workload);

        assert_eq!(cmd.max_steps(), 18_666);
        assert_eq!(
            cmd.render(),
            format!(
                "docker run -t -d -v $HOME/data/:/data/ -v $HOME/experiment_runs/:/experiment_runs \
                 -v $HOME/experiment_runs/logs:/logs --gpus all --ipc=host \
                 {DEFAULT_DOCKER_IMAGE_URL}:latest -d imagenet -f jax \
                 -s prize_qualification_baselines/external_tuning/jax_nadamw_full_budget.py \
                 -w imagenet_resnet \
                 -t prize_qualification_baselines/external_tuning/tuning_search_space.json \
                 -e my_experiment/nadamw -m 18666 -c false -o true -r true -i true"
            )
        );
    }

    #[test]
    fn test_local_mount_comes_before_gpu_flags() {
        let config = config(true);
        let workload = find_builtin("wmt").unwrap();
        let rendered = DockerRunCommand::new(&config, &workload).render();

        let mount = rendered
            .find("-v $HOME/algorithmic-efficiency:/algorithmic-efficiency")
            .unwrap();
        let gpus = rendered.find("--gpus all").unwrap();
        assert!(mount < gpus);
    }

    #[test]
    fn test_rsync_flag_and_framework() {
        let mut config = config(false);
        config.run.rsync_data = false;
        config.run.framework = Framework::Pytorch;
        let workload = find_builtin("criteo1tb").unwrap();
        let args = DockerRunCommand::new(&config, &workload).to_args();

        let flag = |name: &str| {
            let idx = args.iter().rposition(|a| a == name).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(flag("-r"), "false");
        assert_eq!(flag("-f"), "pytorch");
        assert_eq!(flag("-d"), "criteo1tb");
        assert_eq!(flag("-m"), "1066");
    }
}
