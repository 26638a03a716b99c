//! In-place dropout probability patching.
//!
//! Layers opt in by reporting a [`PatchableKind`] and exposing their
//! probability through [`DropoutProbability`]. Functional dropout applied
//! inside a layer's forward pass has no module to patch and is unaffected.

/// Layer kinds whose dropout probability can be overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchableKind {
    /// Standalone dropout layer.
    Dropout,
    /// Multi-head attention, patched through its attention-weight dropout.
    MultiheadAttention,
}

/// A settable dropout probability.
pub trait DropoutProbability {
    fn probability(&self) -> f64;
    fn set_probability(&mut self, p: f64);
}

/// A node in a model's module tree.
pub trait Module {
    /// Short type name, used for tracing.
    fn type_name(&self) -> &'static str;

    /// The patchable kind and probability handle, if this layer has one.
    fn patchable(&mut self) -> Option<(PatchableKind, &mut dyn DropoutProbability)> {
        None
    }

    /// Call `f` on each direct child.
    fn visit_children_mut(&mut self, _f: &mut dyn FnMut(&mut dyn Module)) {}
}

/// Visit `module` and all of its descendants, parents before children.
pub fn walk_mut(module: &mut dyn Module, f: &mut dyn FnMut(&mut dyn Module)) {
    f(&mut *module);
    module.visit_children_mut(&mut |child| walk_mut(child, &mut *f));
}

/// Set the probability of every module of `kind` to `rate`. Returns the count.
pub fn set_probability(model: &mut dyn Module, kind: PatchableKind, rate: f64) -> usize {
    let mut patched = 0;
    walk_mut(model, &mut |module| {
        if let Some((found, prob)) = module.patchable()
            && found == kind
        {
            prob.set_probability(rate);
            patched += 1;
        }
    });
    patched
}

/// Overwrite the probability of every [`Dropout`] layer. `None` leaves the model untouched.
pub fn maybe_update_dropout(model: &mut dyn Module, dropout_rate: Option<f64>) {
    let Some(rate) = dropout_rate else {
        return;
    };
    let patched = set_probability(model, PatchableKind::Dropout, rate);
    tracing::debug!("set dropout to {rate} on {patched} layers");
}

/// Overwrite the attention dropout of every [`MultiheadAttention`] layer.
/// `None` leaves the model untouched.
pub fn update_attention_dropout(model: &mut dyn Module, attention_dropout_rate: Option<f64>) {
    let Some(rate) = attention_dropout_rate else {
        return;
    };
    let patched = set_probability(model, PatchableKind::MultiheadAttention, rate);
    tracing::debug!("set attention dropout to {rate} on {patched} layers");
}

/// Standalone dropout layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dropout {
    pub p: f64,
}

impl Dropout {
    #[must_use]
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl DropoutProbability for Dropout {
    fn probability(&self) -> f64 {
        self.p
    }

    fn set_probability(&mut self, p: f64) {
        self.p = p;
    }
}

impl Module for Dropout {
    fn type_name(&self) -> &'static str {
        "Dropout"
    }

    fn patchable(&mut self) -> Option<(PatchableKind, &mut dyn DropoutProbability)> {
        Some((PatchableKind::Dropout, self as &mut dyn DropoutProbability))
    }
}

/// Dense projection. Has no dropout of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
        }
    }
}

impl Module for Linear {
    fn type_name(&self) -> &'static str {
        "Linear"
    }
}

/// Multi-head attention with dropout on the attention weights.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiheadAttention {
    pub embed_dim: usize,
    pub num_heads: usize,
    pub dropout: f64,
    pub out_proj: Linear,
}

impl MultiheadAttention {
    #[must_use]
    pub fn new(embed_dim: usize, num_heads: usize, dropout: f64) -> Self {
        Self {
            embed_dim,
            num_heads,
            dropout,
            out_proj: Linear::new(embed_dim, embed_dim),
        }
    }
}

impl DropoutProbability for MultiheadAttention {
    fn probability(&self) -> f64 {
        self.dropout
    }

    fn set_probability(&mut self, p: f64) {
        self.dropout = p;
    }
}

impl Module for MultiheadAttention {
    fn type_name(&self) -> &'static str {
        "MultiheadAttention"
    }

    fn patchable(&mut self) -> Option<(PatchableKind, &mut dyn DropoutProbability)> {
        Some((
            PatchableKind::MultiheadAttention,
            self as &mut dyn DropoutProbability,
        ))
    }

    fn visit_children_mut(&mut self, f: &mut dyn FnMut(&mut dyn Module)) {
        f(&mut self.out_proj);
    }
}

/// Ordered container of submodules.
#[derive(Default)]
pub struct Sequential {
    pub layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, layer: impl Module + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl Module for Sequential {
    fn type_name(&self) -> &'static str {
        "Sequential"
    }

    fn visit_children_mut(&mut self, f: &mut dyn FnMut(&mut dyn Module)) {
        for layer in &mut self.layers {
            f(layer.as_mut());
        }
    }
}
