use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use observe_scope::{computed, untracked, Config, Engine, Error, Property, Registration, ScopeType};

use crate::mock::{init_tracing, SharedMock, Spy};
use crate::shapes::{count, counter, Rectangle, RECTANGLE};

const PROBE: ScopeType = ScopeType::new("Probe");

#[test]
fn read_is_memoized() {
	init_tracing();

	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 2, 5);

	assert_eq!(rect.get(&shapes.area).unwrap(), 10);
	assert_eq!(rect.get(&shapes.area).unwrap(), 10);
	assert_eq!(rect.get(&shapes.area).unwrap(), 10);
	assert_eq!(shapes.area_computations(), 1);
	assert_eq!(engine.stats().computing, 0);
}

#[test]
fn stored_reads_default_until_written() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = engine
		.register(Registration::new(RECTANGLE, 1).init(&shapes.width, 7))
		.unwrap();

	assert_eq!(rect.get(&shapes.width).unwrap(), 7);
	assert_eq!(rect.get(&shapes.height).unwrap(), 0);
	assert_eq!(rect.get(&shapes.area).unwrap(), 0);

	rect.set(&shapes.height, 2).unwrap();
	assert_eq!(rect.get(&shapes.area).unwrap(), 14);
}

#[test]
fn failure_is_not_cached() {
	init_tracing();

	let input = Property::stored("Probe", "Input", 1i64).build();
	let fail = Arc::new(AtomicBool::new(true));
	let computations = counter();
	let output: Property<i64> = Property::computed(
		"Probe",
		"Output",
		computed!((input, fail, computations) scope => {
			computations.fetch_add(1, Ordering::SeqCst);
			let input = scope.get(&input)?;
			if fail.load(Ordering::SeqCst) {
				return Err(Error::failed("input unavailable"));
			}
			Ok(input * 10)
		}),
	)
	.build();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();

	let error = probe.get(&output).unwrap_err();
	assert!(matches!(error, Error::Failed(_)), "{error:?}");
	assert!(probe.dependencies(&output).is_empty());
	assert_eq!(engine.stats().edges, 0);
	assert_eq!(engine.stats().computing, 0);

	fail.store(false, Ordering::SeqCst);
	assert_eq!(probe.get(&output).unwrap(), 10);
	assert_eq!(count(&computations), 2);
	assert_eq!(probe.dependencies(&output).len(), 1);
	assert_eq!(engine.stats().computing, 0);
}

#[test]
fn reading_itself_is_a_cycle() {
	let slot = Arc::new(std::sync::OnceLock::<Property<i64>>::new());
	let looped: Property<i64> = Property::computed(
		"Probe",
		"Looped",
		computed!((slot) scope => {
			let me = slot.get().expect("declared");
			Ok(scope.get(me)? + 1)
		}),
	)
	.build();
	slot.set(looped.clone()).unwrap();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();

	let error = probe.get(&looped).unwrap_err();
	assert!(error.is_cycle(), "{error:?}");
	assert_eq!(engine.stats().cached, 0);
}

#[test]
fn caught_cycle_leaves_no_self_edge() {
	let slot = Arc::new(std::sync::OnceLock::<Property<i64>>::new());
	let forgiving: Property<i64> = Property::computed(
		"Probe",
		"Forgiving",
		computed!((slot) scope => {
			let me = slot.get().expect("declared");
			match scope.get(me) {
				Err(error) if error.is_cycle() => Ok(0),
				other => other,
			}
		}),
	)
	.build();
	slot.set(forgiving.clone()).unwrap();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();

	assert_eq!(probe.get(&forgiving).unwrap(), 0);
	assert!(probe.dependencies(&forgiving).is_empty());
	assert_eq!(engine.stats().edges, 0);
	assert_eq!(engine.stats().cached, 1);
}

#[test]
fn nesting_is_limited() {
	let base = Property::stored("Probe", "Base", 1i64).build();
	let mut chain = vec![base.clone()];
	for name in ["L1", "L2", "L3", "L4"] {
		let below = chain.last().unwrap().clone();
		chain.push(
			Property::computed("Probe", name, computed!((below) scope => Ok(scope.get(&below)? + 1)))
				.build(),
		);
	}
	let top = chain.last().unwrap().clone();

	let shallow = Engine::with_config(Config::default().label("shallow").max_depth(3));
	let probe = shallow.register(Registration::new(PROBE, 1)).unwrap();
	let error = probe.get(&top).unwrap_err();
	assert!(matches!(error, Error::DepthExceeded { limit: 3, .. }), "{error:?}");

	let deep = Engine::new();
	let probe = deep.register(Registration::new(PROBE, 1)).unwrap();
	assert_eq!(probe.get(&top).unwrap(), 5);
}

#[test]
fn untracked_reads_are_not_dependencies() {
	let input = Property::stored("Probe", "Input", 1i64).build();
	let tracked = Property::stored("Probe", "Tracked", 1i64).build();
	let computations = counter();
	let output: Property<i64> = Property::computed(
		"Probe",
		"Output",
		computed!((input, tracked, computations) scope => {
			computations.fetch_add(1, Ordering::SeqCst);
			let peeked = untracked(|| scope.get(&input))?;
			Ok(peeked + scope.get(&tracked)?)
		}),
	)
	.build();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();
	assert_eq!(probe.get(&output).unwrap(), 2);

	let dependencies = probe.dependencies(&output);
	assert_eq!(dependencies.len(), 1);
	assert_eq!(dependencies[0].property.name(), "Tracked");

	probe.set(&input, 5).unwrap();
	assert_eq!(probe.get(&output).unwrap(), 2);
	assert_eq!(count(&computations), 1);

	probe.set(&tracked, 5).unwrap();
	assert_eq!(probe.get(&output).unwrap(), 10);
	assert_eq!(count(&computations), 2);
}

#[test]
fn concurrent_readers_share_one_computation() {
	init_tracing();

	let mock = SharedMock::new();
	mock.get()
		.expect_computed()
		.withf(|property| property == "Probe.Slow")
		.times(1)
		.return_const(());

	let input = Property::stored("Probe", "Input", 21i64).build();
	let slow: Property<i64> = Property::computed(
		"Probe",
		"Slow",
		computed!((input, mock) scope => {
			mock.get().computed("Probe.Slow".to_string());
			std::thread::sleep(Duration::from_millis(50));
			Ok(scope.get(&input)? * 2)
		}),
	)
	.build();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();

	let readers = 8;
	let barrier = Barrier::new(readers);
	let values = std::thread::scope(|threads| {
		let handles = (0..readers)
			.map(|_| {
				threads.spawn(|| {
					barrier.wait();
					probe.get(&slow).unwrap()
				})
			})
			.collect::<Vec<_>>();
		handles
			.into_iter()
			.map(|handle| handle.join().unwrap())
			.collect::<Vec<_>>()
	});

	assert!(values.iter().all(|value| *value == 42));
	assert_eq!(engine.stats().computing, 0);
	mock.get().checkpoint();
}

#[test]
fn panicking_computation_releases_its_key() {
	let input = Property::stored("Probe", "Input", 3i64).build();
	let explode = Arc::new(AtomicBool::new(true));
	let fragile: Property<i64> = Property::computed(
		"Probe",
		"Fragile",
		computed!((input, explode) scope => {
			if explode.swap(false, Ordering::SeqCst) {
				panic!("first computation explodes");
			}
			scope.get(&input)
		}),
	)
	.build();

	let engine = Engine::new();
	let probe = engine.register(Registration::new(PROBE, 1)).unwrap();

	let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| probe.get(&fragile)));
	assert!(unwound.is_err());
	assert_eq!(engine.stats().computing, 0);

	assert_eq!(probe.get(&fragile).unwrap(), 3);
	assert_eq!(engine.stats().computing, 0);
}

#[test]
fn concurrent_writers_and_readers_settle() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 1, 1);

	std::thread::scope(|threads| {
		for writer in 0..4i64 {
			let rect = &rect;
			let shapes = &shapes;
			threads.spawn(move || {
				for step in 0..50 {
					rect.set(&shapes.width, writer * 100 + step).unwrap();
				}
			});
		}
		for _ in 0..4 {
			threads.spawn(|| {
				for _ in 0..50 {
					rect.get(&shapes.area).unwrap();
				}
			});
		}
	});

	let width = rect.get(&shapes.width).unwrap();
	let height = rect.get(&shapes.height).unwrap();
	assert_eq!(rect.get(&shapes.area).unwrap(), width * height);
	assert_eq!(engine.stats().computing, 0);
}
