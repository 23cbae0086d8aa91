/// Installs a test-friendly tracing subscriber, ignoring repeated initialisation.
///
/// Usage:
/// - `init_test_tracing!()` - DEBUG level
/// - `init_test_tracing!(TRACE)` - the given `tracing::Level`
///
/// The calling crate needs `tracing` and `tracing-subscriber` as dev-dependencies.
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        $crate::init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    };
}
