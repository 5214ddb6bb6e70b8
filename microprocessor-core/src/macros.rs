#[macro_export]
macro_rules! make_smart_pointer {
    ($name:ident $(<$($gens:ident),*>)?, $inner:ty) => {
        impl$(<$($gens),*>)? std::ops::Deref for $name$(<$($gens),*>)? {
            type Target = $inner;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };

    ($name:ident $(<$($gens:ident),*>)?, $inner:ty, $identifier:ident)=>{
        impl$(<$($gens),*>)? std::ops::Deref for $name$(<$($gens),*>)? {
            type Target = $inner;
            fn deref(&self) -> &Self::Target {
                &self.$identifier
            }
        }
    }

}

/// Logs an error event tagged with the source location it was raised from.
#[macro_export]
macro_rules! trace_error {
    (
        $stmt:expr

        $(, $arg:expr)* $(,)?

    ) => {
        $crate::prelude::tracing::error!("{} {}:{}", format!($stmt, $($arg),*), file!(), line!())
    };
}
