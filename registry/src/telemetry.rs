/// Installs the global fmt subscriber, logging the registry crate at `level`.
///
/// `RUST_LOG` is overwritten. Calling this twice keeps the first subscriber.
pub fn init(level: &str) {
    std::env::set_var("RUST_LOG", format!("registry={}", level));
    if tracing_subscriber::fmt::try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice() {
        super::init("debug");
        super::init("info");
        assert_eq!(std::env::var("RUST_LOG").unwrap(), "registry=info");
    }
}
