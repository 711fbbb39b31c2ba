// ============================================================
// Layer 5 — Exponential Moving Average of Parameters
// ============================================================
//   shadow ← decay × shadow + (1 − decay) × param
//
// The shadow is keyed by ParamId, so it follows a module tree
// across optimizer steps (which keep ids stable) and can be written
// back into any module with the same ids. Shadows live detached on
// the backend they were recorded from; the trainer records from
// `model.valid()` so no graph is ever kept alive.

use std::collections::HashMap;

use burn::{
    module::{ModuleMapper, ModuleVisitor, Param, ParamId},
    prelude::*,
};

use crate::domain::error::ConfigError;

pub struct Ema<B: Backend> {
    decay:   f64,
    shadow:  HashMap<ParamId, Tensor<B, 1>>,
    updates: usize,
}

impl<B: Backend> Ema<B> {
    pub fn new(decay: f64) -> Result<Self, ConfigError> {
        ConfigError::check_rate("EMA decay", decay)?;
        Ok(Self { decay, shadow: HashMap::new(), updates: 0 })
    }

    /// Fold the current parameter values into the shadow. The first
    /// update copies them.
    pub fn update<M: Module<B>>(&mut self, model: &M) {
        let mut visitor = ShadowUpdate { decay: self.decay, shadow: &mut self.shadow };
        model.visit(&mut visitor);
        self.updates += 1;
    }

    /// Replace every shadowed float parameter of `model` by its average.
    pub fn apply<M: Module<B>>(&self, model: M) -> M {
        if self.shadow.is_empty() {
            return model;
        }
        model.map(&mut ShadowLoad { shadow: &self.shadow })
    }

    pub fn num_shadowed(&self) -> usize {
        self.shadow.len()
    }

    pub fn updates(&self) -> usize {
        self.updates
    }
}

struct ShadowUpdate<'a, B: Backend> {
    decay:  f64,
    shadow: &'a mut HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for ShadowUpdate<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        let value = param.val().detach();
        let value = value.clone().reshape([value.shape().num_elements()]);
        let next = match self.shadow.remove(&param.id) {
            Some(previous) => previous.mul_scalar(self.decay) + value.mul_scalar(1.0 - self.decay),
            None => value,
        };
        self.shadow.insert(param.id, next);
    }
}

struct ShadowLoad<'a, B: Backend> {
    shadow: &'a HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> ModuleMapper<B> for ShadowLoad<'_, B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let Some(average) = self.shadow.get(&param.id).cloned() else {
            return param;
        };
        param.map(|tensor| average.reshape(tensor.shape()))
    }
}
