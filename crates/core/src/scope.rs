/// Type alias of [`Box<dyn ConnScope>`]
pub type BoxConnScope = Box<dyn ConnScope>;

/// The resource accounting handle attached to one connection.
///
/// The resource manager hands one scope out per admitted connection, the
/// connection owner must call [`done`](ConnScope::done) exactly once when the
/// connection is torn down.
pub trait ConnScope: Sync + Send {
    /// Release every resource reserved in this scope.
    fn done(&self);
}

/// A scope that does no accounting at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScope;

impl ConnScope for NullScope {
    fn done(&self) {}
}
