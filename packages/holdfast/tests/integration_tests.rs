//! Integration tests for `holdfast` that combine handles, containers and the allocator context.

use std::cell::Cell;
use std::io;
use std::panic;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use holdfast::{
    AllocContext, ContextArray, ErasedAllocator, FixedArray, HybridArray, Optional, Shared,
    TrackingAllocator, Unique, Variant, context_allocator, define_variant, dyn_array,
    make_context_shared, make_context_unique, pop_context_allocator, push_context_allocator,
    with_context,
};

/// Test helper that counts how many times it has been dropped.
#[derive(Debug)]
struct DropCounter(Rc<Cell<usize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

trait Greet {
    fn greet(&self) -> String;
}

#[derive(Debug)]
struct Greeter {
    name: &'static str,
    _drops: DropCounter,
}

impl Greet for Greeter {
    fn greet(&self) -> String {
        format!("hello from {}", self.name)
    }
}

define_variant! {
    #[derive(Debug, Clone, PartialEq)]
    enum Token {
        Number(i64),
        Word(String),
        Flag(bool),
    }
}

/// Collects everything a `tracing` subscriber writes.
#[derive(Clone, Debug, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn tracker() -> (Rc<TrackingAllocator>, ErasedAllocator) {
    let tracker = Rc::new(TrackingAllocator::system());
    let erased = ErasedAllocator::from_rc(Rc::clone(&tracker));

    (tracker, erased)
}

#[test]
fn context_array_keeps_its_allocator_after_context_changes() {
    let (tracker, erased) = tracker();

    let mut values = {
        let _guard = push_context_allocator(erased);

        let mut values = ContextArray::default();
        values.push(1_u64);
        values
    };

    // The context has been restored, yet growth continues through the captured allocator.
    for value in 2..=64 {
        values.push(value);
    }

    assert_eq!(values.len(), 64);
    assert!(tracker.allocation_count() > 1);
    assert_eq!(tracker.live_allocations(), 1);

    drop(values);

    assert_eq!(tracker.live_allocations(), 0);
    assert_eq!(tracker.live_bytes(), 0);
}

#[test]
fn context_array_recaptures_after_reset() {
    let (first, first_erased) = tracker();
    let (second, second_erased) = tracker();

    let mut values = ContextArray::default();

    {
        let _guard = push_context_allocator(first_erased);
        values.push(1_u32);
    }

    values.reset();
    assert_eq!(first.live_allocations(), 0);

    {
        let _guard = push_context_allocator(second_erased);
        values.push(2);
    }

    assert_eq!(first.allocation_count(), 1);
    assert_eq!(second.live_allocations(), 1);
    assert_eq!(values, [2]);
}

#[test]
fn nested_contexts_restore_in_order() {
    let (outer, outer_erased) = tracker();
    let (inner, inner_erased) = tracker();

    let depth_before = with_context(AllocContext::depth);

    {
        let _outer = push_context_allocator(outer_erased.clone());

        {
            let _inner = push_context_allocator(inner_erased.clone());
            assert!(context_allocator().ptr_eq(&inner_erased));

            let _value = make_context_unique(1_u8);
            assert_eq!(inner.live_allocations(), 1);
        }

        assert!(context_allocator().ptr_eq(&outer_erased));

        let _value = make_context_shared(2_u8);
        assert_eq!(outer.live_allocations(), 1);
    }

    assert_eq!(with_context(AllocContext::depth), depth_before);
    assert_eq!(inner.live_allocations(), 0);
    assert_eq!(outer.live_allocations(), 0);
}

#[test]
fn explicit_pop_returns_pushed_allocator() {
    let (_tracker, erased) = tracker();

    let guard = push_context_allocator(erased.clone());
    let popped = pop_context_allocator();

    assert!(popped.ptr_eq(&erased));

    // The guard finds nothing left to remove at its depth and leaves the stack alone.
    drop(guard);
}

#[test]
fn outdated_guard_does_not_remove_newer_allocator() {
    let (_first_tracker, first) = tracker();
    let (second_tracker, second) = tracker();

    let first_guard = push_context_allocator(first);
    _ = pop_context_allocator();

    let second_guard = push_context_allocator(second.clone());

    // The first guard's entry was popped, so dropping it must not touch the second entry.
    drop(first_guard);
    assert!(context_allocator().ptr_eq(&second));

    let value = make_context_unique(5_u32);
    assert_eq!(second_tracker.live_allocations(), 1);

    drop(value);
    drop(second_guard);
    assert_eq!(second_tracker.live_allocations(), 0);
}

#[test]
fn unique_upcast_to_trait_object_drops_once() {
    let drops = Rc::new(Cell::new(0));

    let greeter = Unique::new(Greeter {
        name: "unique",
        _drops: DropCounter(Rc::clone(&drops)),
    });

    let greeter: Unique<dyn Greet> = greeter.upcast(|greeter| greeter as &mut dyn Greet);

    assert_eq!(greeter.greet(), "hello from unique");

    drop(greeter);
    assert_eq!(drops.get(), 1);
}

#[test]
fn shared_from_unique_releases_after_last_owner() {
    let drops = Rc::new(Cell::new(0));

    let unique = Unique::new(Greeter {
        name: "shared",
        _drops: DropCounter(Rc::clone(&drops)),
    });

    let shared = Shared::from(unique);
    let general: Shared<dyn Greet> = shared.upcast(|greeter| greeter as &dyn Greet);

    assert_eq!(shared.use_count(), 2);
    assert!(shared.ptr_eq(&general));
    assert_eq!(general.greet(), "hello from shared");

    drop(shared);
    assert_eq!(drops.get(), 0);
    assert_eq!(general.use_count(), 1);

    drop(general);
    assert_eq!(drops.get(), 1);
}

#[test]
fn hybrid_array_moves_to_heap_past_threshold() {
    let mut values = HybridArray::<String, 4>::new();

    for index in 0..4 {
        values.push(index.to_string());
    }

    assert!(!values.is_overflowed());
    assert_eq!(values.capacity(), 4);

    values.push("4".to_owned());

    assert!(values.is_overflowed());
    assert!(values.capacity() >= 5);
    assert_eq!(values.as_slice(), ["0", "1", "2", "3", "4"]);

    values.clear();

    assert!(values.is_empty());
    assert!(values.is_overflowed());
}

#[test]
fn fixed_array_in_optional_round_trip() {
    let mut slot: Optional<FixedArray<u16, 8>> = Optional::none();

    let array = slot.get_or_insert_with(FixedArray::default);
    array.push(10);
    array.push(20);

    assert_eq!(slot.len(), 2);

    let taken = slot.take().expect("a value was stored above");

    assert!(slot.is_none());
    assert_eq!(taken, [10, 20]);
}

#[test]
fn variant_switches_alternatives_and_drops_old_value() {
    let mut token = Variant::<Token>::new(42_i64);

    assert!(token.is::<i64>());
    assert_eq!(*token.get::<i64>(), 42);

    token.set(String::from("forty-two"));

    assert_eq!(token.tag(), Some(Variant::<Token>::index_of::<String>()));
    assert_eq!(token.try_get::<i64>(), None);

    let rendered = token.visit(|token| match token {
        Token::Number(number) => number.to_string(),
        Token::Word(word) => word.clone(),
        Token::Flag(flag) => flag.to_string(),
    });

    assert_eq!(rendered, "forty-two");

    token.reset();
    assert!(!token.is_valid());
    assert_eq!(token.try_visit(|_| ()), None);
}

#[test]
#[should_panic(expected = "variant holds alternative Flag, not Number")]
fn variant_wrong_alternative_is_a_violation() {
    let token = Variant::<Token>::new(true);

    let _number = token.get::<i64>();
}

#[test]
fn containers_of_handles_drop_every_element() {
    let drops = Rc::new(Cell::new(0));

    let shared = Shared::new(DropCounter(Rc::clone(&drops)));

    let mut handles = dyn_array![shared.clone(), shared.clone()];
    handles.push(shared);

    assert_eq!(handles[0].use_count(), 3);

    handles.pop_n(2);
    assert_eq!(handles[0].use_count(), 1);
    assert_eq!(drops.get(), 0);

    drop(handles);
    assert_eq!(drops.get(), 1);
}

#[test]
fn violation_is_reported_through_tracing() {
    let log = CapturedLog::default();

    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let log = log.clone();
            move || log.clone()
        })
        .finish();
    let _subscriber = tracing::subscriber::set_default(subscriber);

    let result = panic::catch_unwind(|| {
        let values = dyn_array![1, 2, 3];
        values[3]
    });

    assert!(result.is_err());

    let output = log.contents();
    assert!(output.contains("ERROR"), "{output}");
    assert!(output.contains("contract violation"), "{output}");
    assert!(
        output.contains("index 3 is out of range for length 3"),
        "{output}"
    );
}
