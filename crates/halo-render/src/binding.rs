//! Scoped render-target binding.
//!
//! wgpu has no global "current render target", but a frame that chains
//! several passes still needs one place that says which target subsequent
//! draws land in. [`ActiveTarget`] is that place; [`TargetBinding`] swaps a
//! new target in and puts the previous one back when it drops, so an early
//! return through `?` can never leave the wrong target bound.

/// Render targets a frame can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTargetId {
    /// The shared depth-only target.
    Depth,
    /// One of the intermediate color targets, by slot.
    Color(usize),
    /// The target that is handed to presentation.
    Presentation,
}

/// The currently bound render target, if any.
#[derive(Debug, Default)]
pub struct ActiveTarget {
    current: Option<RenderTargetId>,
}

impl ActiveTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// The target draws currently land in.
    pub fn current(&self) -> Option<RenderTargetId> {
        self.current
    }

    /// Bind `target` until the returned guard drops.
    pub fn bind(&mut self, target: RenderTargetId) -> TargetBinding<'_> {
        let previous = self.current.replace(target);
        log::trace!("Bind {target:?} (was {previous:?})");
        TargetBinding {
            slot: self,
            previous,
        }
    }
}

/// Guard restoring the previously bound target on drop.
#[must_use = "the target is unbound as soon as the binding drops"]
#[derive(Debug)]
pub struct TargetBinding<'a> {
    slot: &'a mut ActiveTarget,
    previous: Option<RenderTargetId>,
}

impl TargetBinding<'_> {
    /// The target bound by this guard.
    pub fn target(&self) -> Option<RenderTargetId> {
        self.slot.current
    }

    /// The target that will be restored.
    pub fn previous(&self) -> Option<RenderTargetId> {
        self.previous
    }
}

impl Drop for TargetBinding<'_> {
    fn drop(&mut self) {
        self.slot.current = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_restores_previous_target() {
        let mut active = ActiveTarget::new();
        {
            let binding = active.bind(RenderTargetId::Presentation);
            assert_eq!(binding.target(), Some(RenderTargetId::Presentation));
            assert_eq!(binding.previous(), None);
        }
        assert_eq!(active.current(), None);
    }

    #[test]
    fn test_nested_bindings_unwind_in_order() {
        let mut active = ActiveTarget::new();
        {
            let mut outer = active.bind(RenderTargetId::Color(0));
            {
                let inner = outer.slot.bind(RenderTargetId::Depth);
                assert_eq!(inner.previous(), Some(RenderTargetId::Color(0)));
            }
            assert_eq!(outer.target(), Some(RenderTargetId::Color(0)));
        }
        assert_eq!(active.current(), None);
    }

    #[test]
    fn test_binding_restored_on_error_path() {
        fn failing_draw(active: &mut ActiveTarget) -> Result<(), &'static str> {
            let _binding = active.bind(RenderTargetId::Depth);
            Err("scene failed")
        }

        let mut active = ActiveTarget::new();
        active.current = Some(RenderTargetId::Color(1));
        assert!(failing_draw(&mut active).is_err());
        assert_eq!(active.current(), Some(RenderTargetId::Color(1)));
    }
}
