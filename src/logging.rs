//! Tracing subscriber setup for hosts embedding the crate

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_level`
///
/// Only the first call has an effect. Returns whether this call installed it.
pub fn init_tracing(default_level: Level) -> bool {
    let mut installed = false;
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();
        installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok();
    });
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_call_is_ignored() {
        init_tracing(Level::DEBUG);
        assert!(!init_tracing(Level::INFO));
    }
}
