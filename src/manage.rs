use crate::error::Error;

/// Something the pool can restore to a clean, reusable state before
/// handing it out again. Called on every check-in that doesn't result in
/// the item being destroyed.
///
/// Returning `false` tells the pool the item could not be recycled and
/// should be destroyed instead of returned to the free list.
pub trait Reusable: Send + 'static {
    fn recycle(&mut self) -> bool;

    /// A hook `release(force = true)` can invoke while this item is still
    /// checked out, to proactively invalidate it without waiting for the
    /// borrower to call `check_in`.
    ///
    /// Rust ownership means the pool doesn't hold the item value itself
    /// while it's checked out, so a hard "destroy it right now" isn't
    /// possible in general; items backed by shared (`Arc`-based) state can
    /// still expose a closure here that flips their shared state to
    /// closed. The default is `None`: such items simply aren't reachable
    /// until their borrower returns them, at which point `check_in` sees
    /// the pool is released and destroys them instead of recycling them.
    fn force_close_handle(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        None
    }
}

/// A stable identity assigned by the pool at creation time, used to detect
/// `checkIn` of an item the pool never vended (`Error::ForeignItem`).
///
/// Library users never set this themselves — `ResourcePool::check_out`
/// assigns it once, right after `Manage::create` returns.
pub trait PoolIdentity {
    fn pool_id(&self) -> u64;
    fn set_pool_id(&mut self, id: u64);
}

/// The pool's three lifecycle hooks: how to create an item, how to check
/// one is still usable, and how to tear one down.
pub trait Manage: Send + Sync + 'static {
    type Item: Reusable + PoolIdentity;

    /// Attempt to create a brand new item. Errors propagate to the caller
    /// of `check_out` unchanged (`Error::CreateFailed`).
    fn create(&self) -> Result<Self::Item, Error>;

    /// Confirm an idle (or freshly created) item is still usable.
    fn validate(&self, item: &mut Self::Item) -> bool;

    /// Tear an item down. Infallible at this layer: implementations log
    /// their own failures, mirroring the "errors during destroy are
    /// swallowed and logged" rule for the background reaper.
    fn destroy(&self, item: Self::Item);
}
