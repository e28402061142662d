use anyhow::{Context, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tch::Tensor;

/// A stateless, fallible step turning an `I` into an `O`.
///
/// Raw sources run one per featurized field (input, target, word) before a
/// sample enters the pipeline. Steps compose with `.then(...)`.
///
/// Any `Fn(I) -> Result<O>` closure is a transform.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain::new(self, next)
    }
}

impl<F, I, O> Transform<I, O> for F
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    fn apply(&self, input: I) -> Result<O> {
        self(input)
    }
}

/// A chain of two transforms (`A` -> `B`)
/// - `PhantomData<M>` enforces intermediate type alignment.
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        self.first
            .apply(input)
            .and_then(|mid| self.second.apply(mid))
            .with_context(|| {
                format!(
                    "Transform chain failed: {} -> {}",
                    std::any::type_name::<A>(),
                    std::any::type_name::<B>()
                )
            })
    }
}

/// Shared handle to a tensor-to-tensor field transform.
pub type TensorTransform = Arc<dyn Transform<Tensor, Tensor>>;

/// Optional transforms for the three featurized fields of a speech sample.
///
/// A missing transform leaves the field as loaded.
#[derive(Clone, Default)]
pub struct FieldTransforms {
    pub input: Option<TensorTransform>,
    pub target: Option<TensorTransform>,
    pub word: Option<TensorTransform>,
}

impl FieldTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, transform: impl Transform<Tensor, Tensor> + 'static) -> Self {
        self.input = Some(Arc::new(transform));
        self
    }

    pub fn with_target(mut self, transform: impl Transform<Tensor, Tensor> + 'static) -> Self {
        self.target = Some(Arc::new(transform));
        self
    }

    pub fn with_word(mut self, transform: impl Transform<Tensor, Tensor> + 'static) -> Self {
        self.word = Some(Arc::new(transform));
        self
    }

    pub fn apply_input(&self, tensor: Tensor) -> Result<Tensor> {
        Self::apply_opt(self.input.as_ref(), tensor).context("Input transform failed")
    }

    pub fn apply_target(&self, tensor: Tensor) -> Result<Tensor> {
        Self::apply_opt(self.target.as_ref(), tensor).context("Target transform failed")
    }

    pub fn apply_word(&self, tensor: Tensor) -> Result<Tensor> {
        Self::apply_opt(self.word.as_ref(), tensor).context("Word transform failed")
    }

    fn apply_opt(transform: Option<&TensorTransform>, tensor: Tensor) -> Result<Tensor> {
        match transform {
            Some(t) => t.apply(tensor),
            None => Ok(tensor),
        }
    }
}

impl fmt::Debug for FieldTransforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTransforms")
            .field("input", &self.input.is_some())
            .field("target", &self.target.is_some())
            .field("word", &self.word.is_some())
            .finish()
    }
}
