//! The constraint every templated payload (request, response, goal,
//! feedback, result, topic message, sequence element) must satisfy:
//! trivially copyable, with a fixed, process-independent layout.
//!
//! Rust has no way to reflect "standard layout, trivially copyable" at
//! compile time the way `std::is_trivially_copyable` does in C++, so this
//! is expressed as an `unsafe` marker trait instead of a runtime check.
//! Implementing it for a type that is not `#[repr(C)]` (or
//! `#[repr(transparent)]`/`#[repr(packed)]` over such fields) is undefined
//! behavior the moment that type crosses a process boundary.

/// Marker for types safe to place inside a shared-memory segment and copy
/// by value across processes.
///
/// # Safety
/// Implementors must be `Copy`, own no pointers whose validity is
/// process-local (no `Box`, `Vec`, `String`, references, etc.), and use a
/// layout fixed independently of the compiler's freedom to reorder fields
/// — in practice, `#[repr(C)]` (or `#[repr(transparent)]` /
/// `#[repr(packed)]` composed entirely of `SharedPayload` fields).
pub unsafe trait SharedPayload: Copy + 'static {}

macro_rules! impl_shared_payload {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl SharedPayload for $t {})*
    };
}

impl_shared_payload!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Pose {
        x: f64,
        y: f64,
        theta: f32,
    }
    unsafe impl SharedPayload for Pose {}

    fn assert_shared_payload<T: SharedPayload>() {}

    #[test]
    fn repr_c_struct_satisfies_trait() {
        assert_shared_payload::<Pose>();
    }

    #[test]
    fn primitives_satisfy_trait() {
        assert_shared_payload::<u64>();
        assert_shared_payload::<f32>();
        assert_shared_payload::<bool>();
    }
}
