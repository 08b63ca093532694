use std::sync::{Arc, OnceLock};

use observe_scope::macros::enclose;
use observe_scope::{computed, Engine, Error, Extension, Property, Registration, Scope, ScopeType};

use crate::shapes::Rectangle;

const SHAPE: ScopeType = ScopeType::new("Shape");

struct Labelled {
	width: Property<i64>,
	height: Property<i64>,
	label: Property<String>,
}

impl Labelled {
	fn new() -> Self {
		let width = Property::stored("Shape", "Width", 0i64).build();
		let height = Property::stored("Shape", "Height", 0i64).build();
		let label = Property::computed("Shape", "Label", |_| Ok("rectangle".to_string()))
			.extend(
				Extension::new("square")
					.when(computed!((width, height) scope => Ok(scope.get(&width)? == scope.get(&height)?)))
					.get(|_| Ok("square".to_string())),
			)
			.extend(
				Extension::new("empty")
					.priority(10)
					.when(computed!((width) scope => Ok(scope.get(&width)? == 0)))
					.get(|_| Ok("empty".to_string())),
			)
			.extend(
				Extension::new("also square")
					.when(computed!((width, height) scope => Ok(scope.get(&width)? == scope.get(&height)?)))
					.get(|_| Ok("also square".to_string())),
			)
			.build();

		Labelled {
			width,
			height,
			label,
		}
	}
}

#[test]
fn highest_priority_applicable_extension_wins() {
	let engine = Engine::new();
	let props = Labelled::new();
	let shape = engine.register(Registration::new(SHAPE, 1)).unwrap();

	assert_eq!(shape.get(&props.label).unwrap(), "empty");

	shape.set(&props.width, 2).unwrap();
	assert_eq!(shape.get(&props.label).unwrap(), "rectangle");

	shape.set(&props.height, 2).unwrap();
	assert_eq!(shape.get(&props.label).unwrap(), "square");

	let names = shape
		.dependencies(&props.label)
		.into_iter()
		.map(|dependency| dependency.property.name())
		.collect::<Vec<_>>();
	assert!(names.contains(&"Width"));
	assert!(names.contains(&"Height"));
}

#[test]
fn write_is_forwarded_to_setter() {
	let engine = Engine::new();
	let shapes = Rectangle::new();

	let width = shapes.width.clone();
	let height = shapes.height.clone();
	let area: Property<i64> = Property::computed(
		"Rectangle",
		"ScaledArea",
		computed!((width, height) scope => Ok(scope.get(&width)? * scope.get(&height)?)),
	)
	.extend(
		Extension::new("scale width")
			.when(computed!((height) scope => Ok(scope.get(&height)? != 0)))
			.set(enclose!((width, height) move |scope: &Scope, area: i64| {
				let height = scope.get(&height)?;
				scope.set(&width, area / height)
			})),
	)
	.build();

	let rect = shapes.spawn(&engine, 1, 2, 3);
	assert_eq!(rect.get(&area).unwrap(), 6);

	rect.set(&area, 30).unwrap();
	assert_eq!(rect.get(&shapes.width).unwrap(), 10);
	assert_eq!(rect.get(&area).unwrap(), 30);

	rect.set(&shapes.height, 0).unwrap();
	let error = rect.set(&area, 12).unwrap_err();
	assert!(matches!(error, Error::ReadOnly { .. }), "{error:?}");
}

#[test]
fn forwarded_write_still_validates() {
	let engine = Engine::new();
	let shapes = Rectangle::new();
	let width = shapes.width.clone();
	let doubled: Property<i64> = Property::computed(
		"Rectangle",
		"DoubleWidth",
		computed!((width) scope => Ok(scope.get(&width)? * 2)),
	)
	.rule("even", |value| {
		if value % 2 == 0 {
			Ok(())
		} else {
			Err(format!("{value} is odd"))
		}
	})
	.extend(Extension::new("halve").set(enclose!((width) move |scope: &Scope, value: i64| {
		scope.set(&width, value / 2)
	})))
	.build();

	let rect = shapes.spawn(&engine, 1, 2, 3);

	assert!(matches!(rect.set(&doubled, 7), Err(Error::Validation(_))));
	assert_eq!(rect.get(&shapes.width).unwrap(), 2);

	let error = rect.set(&doubled, -8).unwrap_err();
	assert!(matches!(error, Error::Validation(_)), "{error:?}");

	rect.set(&doubled, 8).unwrap();
	assert_eq!(rect.get(&doubled).unwrap(), 8);
}

/// Two properties whose extension predicates read each other.
fn entangled() -> (Property<i64>, Property<i64>) {
	let left_slot = Arc::new(OnceLock::<Property<i64>>::new());
	let right_slot = Arc::new(OnceLock::<Property<i64>>::new());

	let left: Property<i64> = Property::computed("Knot", "Left", |_| Ok(1))
		.extend(
			Extension::new("mirror right")
				.when(computed!((right_slot) scope => Ok(scope.get(right_slot.get().expect("declared"))? > 0)))
				.get(|_| Ok(2)),
		)
		.build();
	let right: Property<i64> = Property::computed("Knot", "Right", |_| Ok(1))
		.extend(
			Extension::new("mirror left")
				.when(computed!((left_slot) scope => Ok(scope.get(left_slot.get().expect("declared"))? > 0)))
				.get(|_| Ok(2)),
		)
		.build();

	left_slot.set(left.clone()).unwrap();
	right_slot.set(right.clone()).unwrap();
	(left, right)
}

#[test]
fn mutually_dependent_predicates_are_a_cycle() {
	let engine = Engine::new();
	let (left, right) = entangled();
	let knot = engine
		.register(Registration::new(ScopeType::new("Knot"), 1))
		.unwrap();

	let error = knot.get(&left).unwrap_err();
	assert!(error.is_cycle(), "{error:?}");
	let error = knot.get(&right).unwrap_err();
	assert!(error.is_cycle(), "{error:?}");
	assert_eq!(engine.stats().cached, 0);
}

#[test]
fn predicate_reading_its_own_member_is_a_cycle() {
	let slot = Arc::new(OnceLock::<Property<i64>>::new());
	let selfish: Property<i64> = Property::computed("Knot", "Selfish", |_| Ok(1))
		.extend(
			Extension::new("positive")
				.when(computed!((slot) scope => Ok(scope.get(slot.get().expect("declared"))? > 0)))
				.get(|_| Ok(2))
				.set(|_, _| Ok(())),
		)
		.build();
	slot.set(selfish.clone()).unwrap();

	let engine = Engine::new();
	let knot = engine
		.register(Registration::new(ScopeType::new("Knot"), 1))
		.unwrap();

	let error = knot.set(&selfish, 5).unwrap_err();
	assert!(error.is_cycle(), "{error:?}");
}
