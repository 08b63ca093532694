use std::time::Duration;

use observe_scope::{Engine, Error};
use tokio_util::sync::CancellationToken;

use crate::mock::init_tracing;
use crate::shapes::Rectangle;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn records_reads_across_suspension() {
	init_tracing();

	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 3, 4);
	let other = shapes.spawn(&engine, 2, 1, 1);

	let speculation = engine
		.evaluate_recording(async {
			let area = rect.get(&shapes.area)?;
			tokio::task::yield_now().await;
			tokio::time::sleep(Duration::from_millis(5)).await;
			let height = other.get(&shapes.height)?;
			Ok::<_, Error>(area + height)
		})
		.await;

	assert_eq!(*speculation.outcome().as_ref().unwrap(), 13);

	assert!(speculation.depends_on(&rect, &shapes.area));
	assert!(speculation.depends_on(&rect, &shapes.width));
	assert!(speculation.depends_on(&rect, &shapes.height));
	assert!(speculation.depends_on(&other, &shapes.height));
	assert!(!speculation.depends_on(&other, &shapes.width));
	assert_eq!(speculation.dependencies().len(), 4);

	// Only the area computation itself committed edges.
	assert_eq!(engine.stats().edges, 2);
	assert!(speculation.is_current());

	other.set(&shapes.width, 9).unwrap();
	assert!(speculation.is_current());

	rect.set(&shapes.width, 5).unwrap();
	assert!(!speculation.is_current());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_reads_are_recorded_too() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 3, 4);
	rect.get(&shapes.area).unwrap();

	let speculation = engine
		.evaluate_recording(async { rect.get(&shapes.area) })
		.await;

	assert_eq!(speculation.into_outcome().unwrap(), 12);
	assert_eq!(shapes.area_computations(), 1);
}

#[tokio::test]
async fn failure_keeps_dependencies() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 3, 4);

	let speculation = engine
		.evaluate_recording(async {
			let width = rect.get(&shapes.width)?;
			if width > 2 {
				return Err::<i64, _>(Error::failed("too wide"));
			}
			Ok(width)
		})
		.await;

	assert!(matches!(speculation.outcome(), Err(Error::Failed(_))));
	assert!(speculation.depends_on(&rect, &shapes.width));
	assert!(speculation.is_current());
}

#[tokio::test]
async fn panic_becomes_failure() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 3, 4);

	let speculation = engine
		.evaluate_recording(async {
			let width = rect.get(&shapes.width)?;
			if width == 3 {
				panic!("width of three");
			}
			Ok::<_, Error>(width)
		})
		.await;

	match speculation.outcome() {
		Err(Error::Panicked(message)) => assert_eq!(message, "width of three"),
		other => panic!("unexpected outcome {other:?}"),
	}
	assert!(speculation.depends_on(&rect, &shapes.width));
}

#[tokio::test]
async fn cancellation_discards_dependencies() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let rect = shapes.spawn(&engine, 1, 3, 4);

	let token = CancellationToken::new();
	let speculation = engine
		.evaluate_recording_until(token.clone(), async {
			let width = rect.get(&shapes.width)?;
			token.cancel();
			futures::future::pending::<()>().await;
			Ok::<_, Error>(width)
		})
		.await;

	assert!(matches!(speculation.outcome(), Err(Error::Cancelled)));
	assert!(speculation.dependencies().is_empty());
	assert!(!speculation.depends_on(&rect, &shapes.width));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_speculations_are_isolated() {
	let engine = Engine::new();
	let shapes = std::sync::Arc::new(Rectangle::new());
	let first = shapes.spawn(&engine, 1, 3, 4);
	let second = shapes.spawn(&engine, 2, 5, 6);

	let speculate = |scope: observe_scope::Scope| {
		let engine = engine.clone();
		let shapes = shapes.clone();
		tokio::spawn(async move {
			let speculation = engine
				.evaluate_recording(async {
					tokio::task::yield_now().await;
					let width = scope.get(&shapes.width)?;
					tokio::task::yield_now().await;
					Ok::<_, Error>(width)
				})
				.await;
			(scope, speculation)
		})
	};

	let (first_scope, first_run) = speculate(first.clone()).await.unwrap();
	let left = speculate(second.clone());
	let right = speculate(first.clone());
	let (second_scope, second_run) = left.await.unwrap();
	let (_, third_run) = right.await.unwrap();

	assert_eq!(first_scope, first);
	assert_eq!(second_scope, second);
	assert!(first_run.depends_on(&first, &shapes.width));
	assert!(!first_run.depends_on(&second, &shapes.width));
	assert!(second_run.depends_on(&second, &shapes.width));
	assert!(!second_run.depends_on(&first, &shapes.width));
	assert_eq!(third_run.dependencies().len(), 1);
}
