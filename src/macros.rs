pub use enclose::*;

/// Builds a property computation `Fn(&Scope) -> Result<T>`, cloning the
/// listed captures into it first.
///
/// ```
/// use observe_scope::{computed, Property};
///
/// let width = Property::stored("Rectangle", "Width", 3i64).build();
/// let height = Property::stored("Rectangle", "Height", 4i64).build();
/// let area: Property<i64> = Property::computed(
/// 	"Rectangle",
/// 	"Area",
/// 	computed!((width, height) scope => Ok(scope.get(&width)? * scope.get(&height)?)),
/// )
/// .build();
/// # let _ = area;
/// ```
#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) $scope:ident => $($b:tt)*) => {
        $crate::macros::enclose!(($( $d_tt )*) move |$scope: &$crate::Scope| { $($b)* })
    };
    ($scope:ident => $($b:tt)*) => {
        move |$scope: &$crate::Scope| { $($b)* }
    };
}

/// Runs the body inside [`Engine::batch`](crate::Engine::batch), cloning the
/// listed captures first.
#[macro_export]
macro_rules! batch {
    ($engine:expr, ( $($d_tt:tt)* ) => $($b:tt)*) => {
        $engine.batch($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($engine:expr, => $($b:tt)*) => {
        $engine.batch(move || { $($b)* })
    };
}
