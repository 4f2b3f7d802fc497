//! Property tests for the universal invariants in the design notes,
//! checked against a plain `HashMap` oracle.

use std::collections::HashMap;

use bolero::TypeGenerator;
use extholder::Container;
use extholder::Key;

const KEY_COUNT: usize = 6;

#[derive(Clone, Copy, Debug, TypeGenerator)]
enum Op {
  Set { key: u8, value: i32 },
  Get { key: u8 },
}

#[test]
fn set_then_get_matches_oracle() {
  bolero::check!().with_type::<Vec<Op>>().for_each(|ops| {
    let container: Container = Container::new_root();
    let keys: Vec<Key<i32>> = (0..KEY_COUNT)
      .map(|_| container.request_key::<i32>().unwrap())
      .collect();

    let mut oracle: HashMap<usize, i32> = HashMap::new();

    for op in ops {
      match *op {
        Op::Set { key, value } => {
          let index = usize::from(key) % KEY_COUNT;
          let previous = container.set(&keys[index], value).unwrap();
          assert_eq!(previous, oracle.insert(index, value));
        }
        Op::Get { key } => {
          let index = usize::from(key) % KEY_COUNT;
          assert_eq!(container.get(&keys[index]).unwrap(), oracle.get(&index).copied());
        }
      }
    }

    for (index, key) in keys.iter().enumerate() {
      assert_eq!(container.get(key).unwrap(), oracle.get(&index).copied());
    }
  });
}

#[test]
fn distinct_keys_stay_independent() {
  bolero::check!()
    .with_type::<(i32, i32)>()
    .for_each(|&(v1, v2)| {
      let container: Container = Container::new_root();
      let k1 = container.request_key::<i32>().unwrap();
      let k2 = container.request_key::<i32>().unwrap();

      container.set(&k1, v1).unwrap();
      let before = container.get(&k2).unwrap();

      container.set(&k1, v1).unwrap();
      assert_eq!(container.get(&k2).unwrap(), before);

      container.set(&k2, v2).unwrap();
      assert_eq!(container.get(&k1).unwrap(), Some(v1));
    });
}

#[test]
fn trim_is_idempotent_under_arbitrary_fill() {
  bolero::check!().with_type::<Vec<i32>>().for_each(|values| {
    let container: Container = Container::new_root();
    let keys: Vec<Key<i32>> = values
      .iter()
      .map(|_| container.request_key::<i32>().unwrap())
      .collect();

    for (key, value) in keys.iter().zip(values.iter()) {
      container.set(key, *value).unwrap();
    }

    container.trim_to_size().unwrap();
    let first: Vec<_> = keys.iter().map(|k| container.get(k).unwrap()).collect();
    container.trim_to_size().unwrap();
    let second: Vec<_> = keys.iter().map(|k| container.get(k).unwrap()).collect();

    assert_eq!(first, second);
  });
}
