#[macro_export]
macro_rules! throw {
    ($vm:expr, $kind:ident, $msg:expr) => {
        return Err($crate::object::error::create_error(
            $vm,
            $crate::object::error::ErrorKind::$kind,
            String::from($msg),
        ))
    };
    ($vm:expr, $kind:ident, $msg:expr, $($arg:expr),* $(,)?) => {
        return Err($crate::object::error::create_error(
            $vm,
            $crate::object::error::ErrorKind::$kind,
            format!($msg, $($arg),*),
        ))
    };
}
