use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_size: Option<usize>,
    alignment: Option<usize>,
    max_bytes: Option<usize>,
    span_pages: Option<usize>,
    spill_threshold: Option<usize>,
    max_delay_count: Option<usize>,
    delay_interval_ms: Option<u64>,
    span_tracker_cap: Option<usize>,
    max_pages: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_size: usize,
    page_shift: u32,
    alignment: usize,
    max_bytes: usize,
    free_list_size: usize,
    span_pages: usize,
    spill_threshold: usize,
    max_delay_count: usize,
    delay_interval_ms: u64,
    span_tracker_cap: usize,
    max_pages: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_size = cfg.page_size.unwrap_or(4096);
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({}) must be a power of 2",
        page_size
    );
    assert!(
        page_size >= 4096,
        "page_size ({}) must be >= 4096",
        page_size
    );

    let alignment = cfg.alignment.unwrap_or(8);
    assert!(
        alignment.is_power_of_two() && alignment >= 8,
        "alignment ({}) must be a power of 2 and at least pointer-sized",
        alignment
    );

    let max_bytes = cfg.max_bytes.unwrap_or(512);
    assert!(
        max_bytes >= alignment && max_bytes % alignment == 0,
        "max_bytes ({}) must be a multiple of alignment ({})",
        max_bytes,
        alignment
    );

    let span_pages = cfg.span_pages.unwrap_or(8);
    let spill_threshold = cfg.spill_threshold.unwrap_or(256);
    let max_delay_count = cfg.max_delay_count.unwrap_or(48);
    let delay_interval_ms = cfg.delay_interval_ms.unwrap_or(1000);
    let span_tracker_cap = cfg.span_tracker_cap.unwrap_or(1024);
    let max_pages = cfg.max_pages.unwrap_or(128);

    assert!(span_pages > 0, "span_pages must be > 0");
    assert!(spill_threshold > 0, "spill_threshold must be > 0");
    assert!(max_delay_count > 0, "max_delay_count must be > 0");
    assert!(delay_interval_ms > 0, "delay_interval_ms must be > 0");
    assert!(span_tracker_cap > 0, "span_tracker_cap must be > 0");
    assert!(
        max_pages >= span_pages,
        "max_pages ({}) must be >= span_pages ({})",
        max_pages,
        span_pages
    );

    ResolvedConfig {
        page_size,
        page_shift: page_size.trailing_zeros(),
        alignment,
        max_bytes,
        free_list_size: max_bytes / alignment,
        span_pages,
        spill_threshold,
        max_delay_count,
        delay_interval_ms,
        span_tracker_cap,
        max_pages,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/rmempool.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const ALIGNMENT: usize = {};\n\
         pub const MAX_BYTES: usize = {};\n\
         pub const FREE_LIST_SIZE: usize = {};\n\
         pub const SPAN_PAGES: usize = {};\n\
         pub const SPILL_THRESHOLD: usize = {};\n\
         pub const MAX_DELAY_COUNT: usize = {};\n\
         pub const DELAY_INTERVAL_MS: u64 = {};\n\
         pub const SPAN_TRACKER_CAP: usize = {};\n\
         pub const MAX_PAGES: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.alignment,
        cfg.max_bytes,
        cfg.free_list_size,
        cfg.span_pages,
        cfg.spill_threshold,
        cfg.max_delay_count,
        cfg.delay_interval_ms,
        cfg.span_tracker_cap,
        cfg.max_pages,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=RMEMPOOL_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RMEMPOOL_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
