//! Lazy configuration loading through the facade

mod common;

use common::{books, FakeHeap};
use memrestrict_core::prelude::*;
use memrestrict_mem::Restrictor;
use std::sync::atomic::{AtomicUsize, Ordering};

static LOADS: AtomicUsize = AtomicUsize::new(0);
static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

fn tight_budget() -> RestrictConfig {
    LOADS.fetch_add(1, Ordering::SeqCst);
    RestrictConfig::from_lookup(|key| match key {
        THRESHOLD_VAR => Some("0x100".to_string()),
        DEBUG_VAR => Some("1".to_string()),
        _ => None,
    })
}

fn count_hook(config: &RestrictConfig) {
    assert_eq!(config.threshold_bytes, 256);
    HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_config_loaded_once_on_first_use() {
    let r = Restrictor::new(FakeHeap::new())
        .config_source(tight_budget)
        .on_config_loaded(count_hook);
    assert_eq!(LOADS.load(Ordering::SeqCst), 0);

    let p = unsafe { r.allocate(200) }.unwrap();
    assert!(unsafe { r.allocate(100) }.unwrap_err().is_denial());
    unsafe { r.release(p) };
    unsafe { r.allocate(256) }.expect("whole budget after release");

    assert_eq!(LOADS.load(Ordering::SeqCst), 1);
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);

    let config = r.config();
    assert_eq!(config.threshold_bytes, 256);
    assert!(config.debug_enabled());
    assert_eq!(r.stats().threshold_bytes, 256);
    assert_eq!(LOADS.load(Ordering::SeqCst), 1);
    assert_eq!(books(&r), (256, 1));
}

#[test]
fn test_fixed_config_skips_loader() {
    fn never() -> RestrictConfig {
        panic!("fixed configuration must not be reloaded");
    }

    let config = RestrictConfig {
        threshold_bytes: 64,
        debug: false,
    };
    let r = Restrictor::with_config(FakeHeap::new(), config).config_source(never);
    assert_eq!(r.config(), config);
    assert!(unsafe { r.allocate(65) }.is_err());
}

#[test]
fn test_default_budget_is_two_mebibytes() {
    let r = Restrictor::with_config(FakeHeap::new(), RestrictConfig::default());
    unsafe { r.allocate(DEFAULT_THRESHOLD_BYTES) }.expect("exactly the default budget");
    assert!(unsafe { r.allocate(1) }.unwrap_err().is_denial());
}
