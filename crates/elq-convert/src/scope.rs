//! Scope tracking and range-variable naming
//!
//! Tracks the lexical frames the converter opens while descending into
//! operator lambdas, and hands out the globally unique `LQ<n>` /
//! `GroupLQ<n>` names bindings carry in the output tree. The counters live
//! here, per conversion; nothing is process-global.

use elq_expr::ParamId;
use elq_model::TypeUsage;

use crate::convert::ConvertError;

/// What kind of operator opened a frame. Group-element frames switch the
/// allocator to `GroupLQ<n>` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Select,
    Join,
    GroupKey,
    GroupElement,
    OrderBy,
}

/// An active range-variable binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub element_type: TypeUsage,
}

#[derive(Debug)]
struct Frame {
    kind: ScopeKind,
    entries: Vec<(ParamId, Binding)>,
}

/// Opaque token returned by [`ScopeBinder::enter_scope`]; popping with a
/// stale handle is an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeHandle(usize);

/// Per-conversion stack of lexical frames plus the name allocators.
#[derive(Debug)]
pub struct ScopeBinder {
    frames: Vec<Frame>,
    next_var: u32,
    next_group_var: u32,
}

impl ScopeBinder {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_var: 1,
            next_group_var: 1,
        }
    }

    /// Push a new lexical frame.
    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeHandle {
        self.frames.push(Frame {
            kind,
            entries: Vec::new(),
        });
        ScopeHandle(self.frames.len())
    }

    /// Pop the frame identified by `handle`, invalidating its bindings.
    pub fn exit_scope(&mut self, handle: ScopeHandle) -> Result<(), ConvertError> {
        if self.frames.len() != handle.0 {
            return Err(ConvertError::Scope(format!(
                "scope exited out of order: depth {} with handle for depth {}",
                self.frames.len(),
                handle.0
            )));
        }
        self.frames.pop();
        Ok(())
    }

    /// Allocate the next variable name without registering a parameter.
    /// Used for converter-internal bindings nothing in the source refers to.
    pub fn next_name(&mut self) -> String {
        let name = format!("LQ{}", self.next_var);
        self.next_var += 1;
        name
    }

    /// Allocate the next group-element variable name.
    pub fn next_group_name(&mut self) -> String {
        let name = format!("GroupLQ{}", self.next_group_var);
        self.next_group_var += 1;
        name
    }

    /// Bind a lambda parameter in the current frame under a fresh name.
    pub fn bind(&mut self, param: ParamId, element_type: TypeUsage) -> Result<String, ConvertError> {
        let name = match self.current_kind()? {
            ScopeKind::GroupElement => self.next_group_name(),
            _ => self.next_name(),
        };
        self.register(param, name.clone(), element_type)?;
        Ok(name)
    }

    /// Map an additional parameter onto an existing binding (a second lambda
    /// ranging over the same variable, e.g. a join result selector). No new
    /// name is allocated.
    pub fn alias(
        &mut self,
        param: ParamId,
        name: &str,
        element_type: TypeUsage,
    ) -> Result<(), ConvertError> {
        self.register(param, name.to_string(), element_type)
    }

    /// Resolve a parameter identity against the active frames, innermost
    /// first.
    pub fn resolve(&self, param: ParamId) -> Result<&Binding, ConvertError> {
        for frame in self.frames.iter().rev() {
            for (bound, binding) in frame.entries.iter().rev() {
                if *bound == param {
                    return Ok(binding);
                }
            }
        }
        Err(ConvertError::Scope(format!(
            "parameter {:?} is not bound in any active scope",
            param
        )))
    }

    fn register(
        &mut self,
        param: ParamId,
        name: String,
        element_type: TypeUsage,
    ) -> Result<(), ConvertError> {
        let frame = self.frames.last_mut().ok_or_else(|| {
            ConvertError::Scope("binding allocated with no scope on the stack".to_string())
        })?;
        frame.entries.push((param, Binding { name, element_type }));
        Ok(())
    }

    fn current_kind(&self) -> Result<ScopeKind, ConvertError> {
        self.frames
            .last()
            .map(|f| f.kind)
            .ok_or_else(|| ConvertError::Scope("binding allocated with no scope on the stack".to_string()))
    }
}

impl Default for ScopeBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elq_model::PrimitiveKind;

    fn int32() -> TypeUsage {
        TypeUsage::Primitive(PrimitiveKind::Int32)
    }

    #[test]
    fn test_names_increment_monotonically() {
        let mut scope = ScopeBinder::new();
        let h = scope.enter_scope(ScopeKind::Select);
        assert_eq!(scope.bind(ParamId(0), int32()).unwrap(), "LQ1");
        assert_eq!(scope.bind(ParamId(1), int32()).unwrap(), "LQ2");
        scope.exit_scope(h).unwrap();

        // Names are never reused after a pop.
        let h = scope.enter_scope(ScopeKind::Select);
        assert_eq!(scope.bind(ParamId(2), int32()).unwrap(), "LQ3");
        scope.exit_scope(h).unwrap();
    }

    #[test]
    fn test_group_element_frames_use_group_names() {
        let mut scope = ScopeBinder::new();
        let h = scope.enter_scope(ScopeKind::GroupElement);
        assert_eq!(scope.bind(ParamId(0), int32()).unwrap(), "GroupLQ1");
        scope.exit_scope(h).unwrap();
    }

    #[test]
    fn test_resolution_follows_stack_lifetime() {
        let mut scope = ScopeBinder::new();
        let outer = scope.enter_scope(ScopeKind::Select);
        scope.bind(ParamId(0), int32()).unwrap();

        let inner = scope.enter_scope(ScopeKind::Select);
        scope.bind(ParamId(1), int32()).unwrap();
        assert_eq!(scope.resolve(ParamId(0)).unwrap().name, "LQ1");
        assert_eq!(scope.resolve(ParamId(1)).unwrap().name, "LQ2");
        scope.exit_scope(inner).unwrap();

        // The inner binding died with its frame.
        assert!(scope.resolve(ParamId(1)).is_err());
        assert!(scope.resolve(ParamId(0)).is_ok());
        scope.exit_scope(outer).unwrap();
        assert!(scope.resolve(ParamId(0)).is_err());
    }

    #[test]
    fn test_out_of_order_exit_is_a_scope_error() {
        let mut scope = ScopeBinder::new();
        let outer = scope.enter_scope(ScopeKind::Select);
        let _inner = scope.enter_scope(ScopeKind::Join);
        let err = scope.exit_scope(outer).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_alias_shares_a_name() {
        let mut scope = ScopeBinder::new();
        let h = scope.enter_scope(ScopeKind::Join);
        let name = scope.bind(ParamId(0), int32()).unwrap();
        scope.alias(ParamId(7), &name, int32()).unwrap();
        assert_eq!(scope.resolve(ParamId(7)).unwrap().name, name);
        scope.exit_scope(h).unwrap();
    }
}
