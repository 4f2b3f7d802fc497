#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use loom::thread::JoinHandle;
use std::ops::Deref;

use extholder::Container;
use extholder::ConstParams;
use extholder::Key;

type Small = ConstParams<16>;
type ArcContainer = Arc<Container<Small>>;
type Setter = JoinHandle<Option<usize>>;
type Getter = JoinHandle<Option<usize>>;

struct LoomContainer {
  inner: ArcContainer,
}

impl LoomContainer {
  fn new() -> Self {
    Self {
      inner: ArcContainer::new(Container::new_root()),
    }
  }

  fn spawn_set(&self, key: Key<usize>, value: usize) -> Setter {
    let container: ArcContainer = ArcContainer::clone(&self.inner);
    thread::spawn(move || container.set(&key, value).unwrap())
  }

  fn spawn_get(&self, key: Key<usize>) -> Getter {
    let container: ArcContainer = ArcContainer::clone(&self.inner);
    thread::spawn(move || container.get(&key).unwrap())
  }
}

impl Deref for LoomContainer {
  type Target = ArcContainer;

  #[inline]
  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

#[test]
fn test_concurrent_set_same_key() {
  loom::model(|| {
    let container: LoomContainer = LoomContainer::new();
    let key: Key<usize> = container.request_key::<usize>().unwrap();

    let a: Setter = container.spawn_set(key, 1);
    let b: Setter = container.spawn_set(key, 2);

    a.join().unwrap();
    b.join().unwrap();

    // Exactly one of the two writes is the final observable value.
    let observed: Option<usize> = container.get(&key).unwrap();
    assert!(observed == Some(1) || observed == Some(2));
  });
}

#[test]
fn test_set_read_race() {
  loom::model(|| {
    let container: LoomContainer = LoomContainer::new();
    let key: Key<usize> = container.request_key::<usize>().unwrap();
    container.set(&key, 123).unwrap();

    let set: Setter = container.spawn_set(key, 456);
    let get: Getter = container.spawn_get(key);

    set.join().unwrap();

    // The concurrent read must observe either the old or the new value,
    // never torn or fabricated data.
    if let Some(value) = get.join().unwrap() {
      assert!(value == 123 || value == 456);
    }
  });
}

#[test]
fn test_distinct_keys_do_not_race() {
  loom::model(|| {
    let container: LoomContainer = LoomContainer::new();
    let key_a: Key<usize> = container.request_key::<usize>().unwrap();
    let key_b: Key<usize> = container.request_key::<usize>().unwrap();

    let set_a: Setter = container.spawn_set(key_a, 1);
    let set_b: Setter = container.spawn_set(key_b, 2);

    set_a.join().unwrap();
    set_b.join().unwrap();

    assert_eq!(container.get(&key_a).unwrap(), Some(1));
    assert_eq!(container.get(&key_b).unwrap(), Some(2));
  });
}

#[test]
fn test_growth_race() {
  loom::model(|| {
    let container: LoomContainer = LoomContainer::new();

    // Request enough keys to guarantee at least one array growth once both
    // threads below write past the initial minimum allocation.
    let keys: Vec<Key<usize>> = (0..12)
      .map(|_| container.request_key::<usize>().unwrap())
      .collect();

    let key_a: Key<usize> = keys[10];
    let key_b: Key<usize> = keys[11];

    let set_a: Setter = container.spawn_set(key_a, 10);
    let set_b: Setter = container.spawn_set(key_b, 11);

    set_a.join().unwrap();
    set_b.join().unwrap();

    assert_eq!(container.get(&key_a).unwrap(), Some(10));
    assert_eq!(container.get(&key_b).unwrap(), Some(11));
  });
}

#[test]
fn test_set_read_unaffected_by_other_key_write() {
  loom::model(|| {
    let container: LoomContainer = LoomContainer::new();
    let key_a: Key<usize> = container.request_key::<usize>().unwrap();
    let key_b: Key<usize> = container.request_key::<usize>().unwrap();

    container.set(&key_a, 111).unwrap();
    container.set(&key_b, 222).unwrap();

    let get_b: Getter = container.spawn_get(key_b);
    let set_a: Setter = container.spawn_set(key_a, 999);

    set_a.join().unwrap();
    assert_eq!(get_b.join().unwrap(), Some(222));
  });
}
