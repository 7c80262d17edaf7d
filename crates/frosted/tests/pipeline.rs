//! Integration tests: drive the whole pipeline from the caller-facing
//! `ImageBlurrer` through the dispatcher thread and back.

#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use frosted::{
    BlurError, BlurEvent, BlurKey, BlurListener, BlurrerConfig, ContainerStatus, CropRegion,
    ImageBlurrer, ImageCache, MemoryCache, RgbaImage, ShutdownPolicy, ViewBounds,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(10);

/// Memory cache that counts traffic and records the order of lookups.
struct RecordingCache {
    inner: MemoryCache,
    gets: Mutex<Vec<String>>,
    puts: AtomicUsize,
    gate: Option<Receiver<()>>,
}

impl RecordingCache {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::new(1 << 26),
            gets: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            gate: None,
        })
    }

    /// A cache whose every lookup waits for one message on the returned
    /// sender, holding the dispatcher mid-request.
    fn gated() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let cache = Arc::new(Self {
            inner: MemoryCache::new(1 << 26),
            gets: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            gate: Some(rx),
        });
        (cache, tx)
    }

    fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl ImageCache for RecordingCache {
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.gets.lock().push(key.to_string());
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.inner.get(key)
    }

    fn put(&self, key: &str, image: Arc<RgbaImage>) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, image);
    }
}

type Events = Arc<Mutex<Vec<BlurEvent>>>;

fn recorder() -> (Events, impl BlurListener + 'static) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |event: BlurEvent| sink.lock().push(event))
}

fn config(batch_delay_ms: u64) -> BlurrerConfig {
    BlurrerConfig {
        batch_delay_ms,
        ..BlurrerConfig::default()
    }
}

fn gradient(width: u32, height: u32) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    }))
}

fn ready_image(event: &BlurEvent) -> Arc<RgbaImage> {
    match event {
        BlurEvent::Ready { image, .. } => Arc::clone(image),
        BlurEvent::Failed(err) => unreachable!("unexpected failure: {err}"),
    }
}

#[test]
fn concurrent_same_key_requests_share_one_work_item() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();
    blurrer.stop();

    let image = gradient(64, 64);
    let recorders: Vec<_> = (0..5).map(|_| recorder()).collect();
    let mut events = Vec::new();
    let mut containers = Vec::new();
    for (sink, listener) in recorders {
        containers.push(blurrer.blur(Arc::clone(&image), "k1", listener).unwrap());
        events.push(sink);
    }
    assert_eq!(blurrer.queue().queued(), 1);

    blurrer.queue().start().unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());

    assert_eq!(cache.gets.lock().len(), 1);
    let first = ready_image(&events[0].lock()[0]);
    for sink in &events {
        let sink = sink.lock();
        assert_eq!(sink.len(), 1);
        assert!(Arc::ptr_eq(&ready_image(&sink[0]), &first));
    }
    for container in &containers {
        assert!(Arc::ptr_eq(&container.image().unwrap(), &first));
    }
}

#[test]
fn work_items_are_processed_in_request_order() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();
    blurrer.stop();

    let names: Vec<String> = (0..8).map(|i| format!("key-{i}")).collect();
    let _containers: Vec<_> = names
        .iter()
        .map(|name| {
            let (_, listener) = recorder();
            blurrer.blur(gradient(32, 32), name, listener).unwrap()
        })
        .collect();

    blurrer.queue().start().unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());

    let expected: Vec<String> = names
        .iter()
        .map(|name| BlurKey::derive(name).to_string())
        .collect();
    assert_eq!(*cache.gets.lock(), expected);
}

#[test]
fn cache_hit_is_delivered_without_blurring() {
    let cache = RecordingCache::new();
    let cached = Arc::new(RgbaImage::from_pixel(3, 3, image::Rgba([7, 7, 7, 255])));
    cache
        .inner
        .put(BlurKey::derive("hit").as_str(), Arc::clone(&cached));
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();

    let (events, listener) = recorder();
    let container = blurrer.blur(gradient(64, 64), "hit", listener).unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());

    assert!(Arc::ptr_eq(&ready_image(&events.lock()[0]), &cached));
    assert!(Arc::ptr_eq(&container.image().unwrap(), &cached));
    assert_eq!(cache.puts(), 0);
}

#[test]
fn canceling_every_listener_prevents_delivery_and_cache_write() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();
    blurrer.stop();

    let (a_events, a) = recorder();
    let (b_events, b) = recorder();
    let first = blurrer.blur(gradient(64, 64), "k2", a).unwrap();
    let second = blurrer.blur(gradient(64, 64), "k2", b).unwrap();
    first.cancel().unwrap();
    second.cancel().unwrap();
    assert_eq!(blurrer.in_flight(), 0);

    blurrer.queue().start().unwrap();
    thread::sleep(Duration::from_millis(100));
    blurrer.poll().unwrap();

    assert!(cache.gets.lock().is_empty());
    assert_eq!(cache.puts(), 0);
    assert!(a_events.lock().is_empty());
    assert!(b_events.lock().is_empty());
    assert_eq!(blurrer.queue().pending(), 0);
}

#[test]
fn cancel_while_blurring_skips_cache_write() {
    let (cache, gate) = RecordingCache::gated();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();

    let (events, listener) = recorder();
    let container = blurrer.blur(gradient(64, 64), "k3", listener).unwrap();
    while cache.gets.lock().is_empty() {
        thread::sleep(Duration::from_millis(1));
    }
    container.cancel().unwrap();
    gate.send(()).unwrap();

    thread::sleep(Duration::from_millis(100));
    blurrer.poll().unwrap();
    assert_eq!(cache.puts(), 0);
    assert!(events.lock().is_empty());
    assert!(matches!(container.status(), ContainerStatus::Canceled));
}

#[test]
fn partial_cancellation_still_delivers_to_remaining_listener() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();
    blurrer.stop();

    let (a_events, a) = recorder();
    let (b_events, b) = recorder();
    let (c_events, c) = recorder();
    let first = blurrer.blur(gradient(64, 64), "k4", a).unwrap();
    let second = blurrer.blur(gradient(64, 64), "k4", b).unwrap();
    let third = blurrer.blur(gradient(64, 64), "k4", c).unwrap();
    first.cancel().unwrap();
    second.cancel().unwrap();
    assert_eq!(blurrer.in_flight(), 1);

    blurrer.queue().start().unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());

    assert!(a_events.lock().is_empty());
    assert!(b_events.lock().is_empty());
    assert_eq!(c_events.lock().len(), 1);
    assert!(third.image().is_some());
    // The cache write follows delivery; stopping joins the dispatcher.
    blurrer.stop();
    assert_eq!(cache.puts(), 1);
    assert_eq!(blurrer.stats().canceled_requests, 0);
}

#[test]
fn failure_on_one_key_does_not_affect_another() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();

    let (bad_events, bad) = recorder();
    let (good_events, good) = recorder();
    // A 4x4 region shrinks to nothing at the default scale factor.
    let failing = blurrer
        .blur_cropped(gradient(64, 64), "bad", CropRegion::new(4, 4, 0, 0), bad)
        .unwrap();
    let working = blurrer.blur(gradient(64, 64), "good", good).unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());

    assert!(matches!(
        bad_events.lock()[0],
        BlurEvent::Failed(ref err) if matches!(**err, BlurError::Transform(_))
    ));
    assert!(matches!(failing.status(), ContainerStatus::Failed(_)));
    assert!(failing.image().is_none());
    assert_eq!(good_events.lock().len(), 1);
    assert!(working.image().is_some());
    // Only the successful blur is cached.
    blurrer.stop();
    assert_eq!(cache.puts(), 1);
}

#[test]
fn cropped_request_is_floor_divided_by_scale_factor() {
    let blurrer = ImageBlurrer::start(RecordingCache::new(), &config(0)).unwrap();
    let (_, listener) = recorder();
    let container = blurrer
        .blur_cropped(
            gradient(100, 100),
            "crop",
            CropRegion::new(50, 50, 10, 10),
            listener,
        )
        .unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());
    assert_eq!(container.image().unwrap().dimensions(), (6, 6));
}

#[test]
fn view_bounds_clamp_negative_offsets() {
    let blurrer = ImageBlurrer::start(RecordingCache::new(), &config(0)).unwrap();
    let (_, listener) = recorder();
    let bounds = ViewBounds {
        measured_width: 80,
        measured_height: 48,
        left: -20,
        top: -4,
    };
    let container = blurrer
        .blur_to_bounds(gradient(100, 100), "bounds", bounds, listener)
        .unwrap();
    assert!(blurrer.wait_idle(WAIT).unwrap());
    assert_eq!(container.image().unwrap().dimensions(), (10, 6));
}

#[test]
fn completions_within_the_window_share_one_tick() {
    let blurrer = ImageBlurrer::start(RecordingCache::new(), &config(100)).unwrap();
    blurrer.stop();

    let (a_events, a) = recorder();
    let (b_events, b) = recorder();
    let _a = blurrer.blur(gradient(64, 64), "a", a).unwrap();
    let _b = blurrer.blur(gradient(64, 64), "b", b).unwrap();
    blurrer.queue().start().unwrap();

    assert!(blurrer.wait_idle(WAIT).unwrap());
    assert_eq!(a_events.lock().len(), 1);
    assert_eq!(b_events.lock().len(), 1);
    let stats = blurrer.stats();
    assert_eq!(stats.delivery_ticks, 1);
    assert_eq!(stats.listeners_notified, 2);
}

#[test]
fn home_thread_is_enforced() {
    let blurrer = ImageBlurrer::start(RecordingCache::new(), &config(0)).unwrap();
    let (_, listener) = recorder();
    let container = blurrer.blur(gradient(16, 16), "home", listener).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            let (_, listener) = recorder();
            assert!(matches!(
                blurrer.blur(gradient(16, 16), "away", listener),
                Err(BlurError::NotOnHomeThread)
            ));
            assert!(matches!(container.cancel(), Err(BlurError::NotOnHomeThread)));
            assert!(matches!(blurrer.poll(), Err(BlurError::NotOnHomeThread)));
        });
    });

    assert!(!container.is_canceled());
    assert!(blurrer.wait_idle(WAIT).unwrap());
}

#[test]
fn drain_policy_finishes_queued_work_on_stop() {
    let drain = BlurrerConfig {
        shutdown: ShutdownPolicy::Drain,
        ..config(0)
    };
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &drain).unwrap();
    blurrer.stop();

    let sinks: Vec<Events> = ["x", "y", "z"]
        .iter()
        .map(|name| {
            let (events, listener) = recorder();
            blurrer.blur(gradient(32, 32), name, listener).unwrap();
            events
        })
        .collect();

    blurrer.queue().start().unwrap();
    blurrer.stop();
    assert_eq!(blurrer.queue().queued(), 0);
    assert_eq!(cache.puts(), 3);

    assert_eq!(blurrer.poll().unwrap(), 3);
    assert!(sinks.iter().all(|events| events.lock().len() == 1));
}

#[test]
fn abandon_policy_leaves_queued_work_untouched() {
    let cache = RecordingCache::new();
    let blurrer = ImageBlurrer::start(cache.clone(), &config(0)).unwrap();
    blurrer.stop();

    let (events, listener) = recorder();
    let container = blurrer.blur(gradient(32, 32), "left", listener).unwrap();

    assert!(!blurrer.wait_idle(Duration::from_millis(100)).unwrap());
    assert!(events.lock().is_empty());
    assert!(matches!(container.status(), ContainerStatus::Pending));
    assert_eq!(blurrer.queue().queued(), 1);
    assert!(cache.gets.lock().is_empty());
}
