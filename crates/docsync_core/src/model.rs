//! Model views over a document's root containers.
//!
//! A [`DocModel`] shapes the raw CRDT into whatever typed surface the host
//! wants: it grabs root container references once at attach time and exposes
//! accessors over them. Container references obtained from `yrs` stay valid
//! across applied updates, so a view attached at open observes every later
//! local mutation and remote apply without any rebuild step.
//!
//! [`MapModel`] is the bundled general-purpose view: a single root map with
//! typed get/set helpers, enough for key-value shaped documents and for
//! tests. Hosts with richer schemas implement [`DocModel`] themselves.

use yrs::{Any, Doc, Map, MapRef, Out, ReadTxn, TransactionMut};

/// The root map name used by [`MapModel`].
const DATA_MAP_NAME: &str = "data";

/// A typed view over a document's root containers.
///
/// Implementations must be cheap to attach: grab container references, do not
/// read state. Reading happens later, through transactions the runtime or the
/// host opens.
pub trait DocModel: Send + Sync + Sized + 'static {
    /// Build the view over a document's root containers.
    fn attach(doc: &Doc) -> Self;
}

/// General-purpose key-value model over a root map named `"data"`.
#[derive(Clone)]
pub struct MapModel {
    map: MapRef,
}

impl std::fmt::Debug for MapModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapModel").finish_non_exhaustive()
    }
}

impl DocModel for MapModel {
    fn attach(doc: &Doc) -> Self {
        Self {
            map: doc.get_or_insert_map(DATA_MAP_NAME),
        }
    }
}

impl MapModel {
    /// The underlying root map, for hosts that need direct access.
    pub fn map(&self) -> &MapRef {
        &self.map
    }

    /// Set a value under `key`.
    pub fn set<V: Into<Any>>(&self, txn: &mut TransactionMut<'_>, key: &str, value: V) {
        self.map.insert(txn, key, value.into());
    }

    /// Remove a value under `key`.
    pub fn remove(&self, txn: &mut TransactionMut<'_>, key: &str) {
        self.map.remove(txn, key);
    }

    /// Get the raw value under `key`.
    pub fn get<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<Out> {
        self.map.get(txn, key)
    }

    /// Get a string value under `key`.
    pub fn get_string<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<String> {
        self.map.get(txn, key).and_then(|v| v.cast::<String>().ok())
    }

    /// Get an integer value under `key`.
    pub fn get_i64<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<i64> {
        match self.map.get(txn, key) {
            Some(Out::Any(Any::BigInt(n))) => Some(n),
            Some(Out::Any(Any::Number(n))) => Some(n as i64),
            _ => None,
        }
    }

    /// Get a boolean value under `key`.
    pub fn get_bool<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<bool> {
        match self.map.get(txn, key) {
            Some(Out::Any(Any::Bool(b))) => Some(b),
            _ => None,
        }
    }

    /// All keys present in the root map.
    pub fn keys<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        self.map.keys(txn).map(String::from).collect()
    }

    /// Number of entries in the root map.
    pub fn len<T: ReadTxn>(&self, txn: &T) -> u32 {
        self.map.len(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::Transact;

    #[test]
    fn test_set_and_get_typed_values() {
        let doc = Doc::new();
        let model = MapModel::attach(&doc);

        {
            let mut txn = doc.transact_mut();
            model.set(&mut txn, "title", "hello");
            model.set(&mut txn, "count", 3i64);
            model.set(&mut txn, "done", true);
        }

        let txn = doc.transact();
        assert_eq!(model.get_string(&txn, "title"), Some("hello".to_string()));
        assert_eq!(model.get_i64(&txn, "count"), Some(3));
        assert_eq!(model.get_bool(&txn, "done"), Some(true));
        assert_eq!(model.get_i64(&txn, "missing"), None);
        assert_eq!(model.len(&txn), 3);
    }

    #[test]
    fn test_remove() {
        let doc = Doc::new();
        let model = MapModel::attach(&doc);

        {
            let mut txn = doc.transact_mut();
            model.set(&mut txn, "key", "value");
        }
        {
            let mut txn = doc.transact_mut();
            model.remove(&mut txn, "key");
        }

        let txn = doc.transact();
        assert_eq!(model.get_string(&txn, "key"), None);
    }

    #[test]
    fn test_view_observes_updates_applied_after_attach() {
        use yrs::updates::decoder::Decode;
        use yrs::{ReadTxn, StateVector, Update};

        let source = Doc::new();
        let source_model = MapModel::attach(&source);
        {
            let mut txn = source.transact_mut();
            source_model.set(&mut txn, "count", 9i64);
        }
        let update = source
            .transact()
            .encode_state_as_update_v1(&StateVector::default());

        let target = Doc::new();
        let target_model = MapModel::attach(&target);
        {
            let mut txn = target.transact_mut();
            txn.apply_update(Update::decode_v1(&update).unwrap()).unwrap();
        }

        let txn = target.transact();
        assert_eq!(target_model.get_i64(&txn, "count"), Some(9));
    }
}
