//! Boilerplate for newtypes that wrap a single `inner` field.

/// Implement [core::ops::Deref] for a newtype whose payload lives in a field named `inner`.
#[macro_export]
macro_rules! impl_deref {
    ($ty:ty, $target:ty) => {
        impl core::ops::Deref for $ty {
            type Target = $target;

            fn deref(&self) -> &Self::Target {
                &self.inner
            }
        }
    };
}

/// Implement lossless conversions in both directions between a newtype and its `inner` field.
#[macro_export]
macro_rules! impl_conversion {
    ($ty:ty, $inner:ty) => {
        impl From<$inner> for $ty {
            fn from(inner: $inner) -> Self {
                Self { inner }
            }
        }

        impl From<$ty> for $inner {
            fn from(value: $ty) -> Self {
                value.inner
            }
        }
    };
}
