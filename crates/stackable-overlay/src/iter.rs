//! Extensions for use cases that [`Iterator`] doesn't handle natively quite yet

/// Fallible counterpart of the std [`FromIterator`] trait.
///
/// Collections like [`ResourceSet`](crate::resource::ResourceSet) reject some
/// items (for example duplicate identities). Collecting stops at the first
/// rejected item and its error is returned.
pub trait TryFromIterator<T>: Sized {
    type Error: std::error::Error;

    fn try_from_iter<I: IntoIterator<Item = T>>(iter: I) -> Result<Self, Self::Error>;
}
