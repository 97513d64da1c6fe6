use std::path::PathBuf;
use std::time::Duration;

use memeforge::{Area, Areas, CacheOptions, Color, MacroCache, Template, TextLine,
    macro_from_overlay};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "memeforge_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn blank_line() -> TextLine {
    TextLine {
        text: " ".to_string(),
        color: Color::rgb(1.0, 1.0, 1.0),
        stroke_color: Color::rgb(0.0, 0.0, 0.0),
        field: Areas(vec![Area {
            x: 0.5,
            y: 0.9,
            width: 0.0,
            tween: false,
        }]),
        start: 0.0,
        end: 0.0,
    }
}

fn cache_with(dir: PathBuf, min_prune_bytes: u64, max_access_age: Duration) -> MacroCache {
    MacroCache::new(
        dir,
        CacheOptions {
            min_prune_bytes,
            max_access_age,
            poll_interval: Duration::from_millis(25),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn small_caches_are_never_pruned() {
    let dir = temp_dir("janitor_floor");
    // Everything is stale (zero max age), but the cache is tiny.
    let cache = cache_with(dir.clone(), 1 << 20, Duration::ZERO);
    for i in 0..3 {
        std::fs::write(dir.join(format!("0000-{i}.png")), vec![0u8; 100]).unwrap();
    }
    std::thread::sleep(Duration::from_millis(30));

    cache.sweep();

    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 3);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn oversized_caches_evict_only_stale_entries() {
    let dir = temp_dir("janitor_age");
    let cache = cache_with(dir.clone(), 1, Duration::from_millis(150));

    let stale = dir.join("0000-1.png");
    std::fs::write(&stale, vec![0u8; 512]).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let fresh = dir.join("0000-2.png");
    std::fs::write(&fresh, vec![0u8; 512]).unwrap();

    cache.sweep();

    assert!(!stale.exists(), "stale entry should be evicted");
    assert!(fresh.exists(), "freshly written entry must survive");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn sweep_ignores_directories_and_tolerates_junk() {
    let dir = temp_dir("janitor_junk");
    let cache = cache_with(dir.clone(), 1, Duration::ZERO);
    std::fs::create_dir_all(dir.join("subdir")).unwrap();
    std::fs::write(dir.join("0000-1.png"), vec![0u8; 64]).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    cache.sweep();

    assert!(dir.join("subdir").is_dir());
    assert!(!dir.join("0000-1.png").exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn evicted_entries_regenerate_on_demand() {
    let root = temp_dir("janitor_regen");
    std::fs::create_dir_all(root.join("templates")).unwrap();
    let tpl_path = root.join("templates/1.png");
    image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]))
        .save(&tpl_path)
        .unwrap();
    let t = Template {
        id: 1,
        path: tpl_path,
        width: 8,
        height: 8,
        name: "t".into(),
        creator: -1,
        created_at: String::new(),
        areas: Vec::new(),
        hidden: false,
    };

    let cache = cache_with(root.join("macros"), 1, Duration::from_millis(50));
    let m = macro_from_overlay(1, 1, vec![blank_line()]);

    let first = cache.fetch_or_generate(&m, &t).unwrap();
    assert_eq!(cache.stats().generated, 1);

    std::thread::sleep(Duration::from_millis(120));
    cache.sweep();
    assert!(!first.path.exists(), "entry should be evicted");

    // A request after eviction sees a plain miss and regenerates.
    let second = cache.fetch_or_generate(&m, &t).unwrap();
    assert_eq!(cache.stats().generated, 2);
    assert_eq!(second.etag, first.etag, "idempotent regeneration");

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn background_janitor_ticks_and_stops_cleanly() {
    let dir = temp_dir("janitor_loop");
    let cache = cache_with(dir.clone(), 1, Duration::from_millis(20));
    std::fs::write(dir.join("0000-9.gif"), vec![0u8; 256]).unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let handle = cache.spawn_janitor();
    // A few poll intervals are plenty for the tick to fire.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while dir.join("0000-9.gif").exists() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!dir.join("0000-9.gif").exists());

    handle.stop();
    std::fs::remove_dir_all(&dir).ok();
}
