//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` for a cloneable field.
///
/// ```ignore
/// impl_from_ref!(QueryService, query);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for QueryService {
///     fn from_ref(state: &AppState) -> Self {
///         state.query.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
