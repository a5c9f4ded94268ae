use std::{cmp::Ordering, sync::Arc};

use crate::codec::{Deserializer, LineCodec, LineFormat, Serializer};

/// A dynamically-typed total order over records.
pub type CmpFn<T> = dyn Send + Sync + Fn(&T, &T) -> Ordering;

/// A dynamically-typed equality test over records.
pub type EqFn<T> = dyn Send + Sync + Fn(&T, &T) -> bool;

/// The immutable capability bundle of an externalized file.
///
/// Records are opaque to the core: everything it knows about them is
/// supplied here — a (de)serializer pair, a total order and an equality
/// test — plus the spill and sampling tuning knobs. Settings are shared by
/// reference between a file and everything derived from it.
pub struct Settings<T> {
    /// Temp-file name prefix.
    pub prefix: String,
    /// Suffix for spill files under the workspace `tmp/` dir.
    pub suffix_tmp: String,
    /// Suffix appended by `saved_as` when the target name lacks it.
    pub suffix_sav: String,
    /// Serialized-size hint for one record, in bytes.
    pub ave_sz: usize,
    /// Cardinality threshold above which a stored transient spills to disk.
    pub card_cap: usize,
    /// Byte budget for a single in-memory sort run.
    pub ram_cap: usize,
    /// Default record-count cap for a single sort run.
    pub cap: usize,
    /// Whether to sample record sizes to derive the sort run cap.
    pub do_sampling: bool,
    /// How many records to sample.
    pub sampling_sz: usize,
    /// Forces spill to disk even for small results.
    pub always_on_disk: bool,

    pub serializer: Arc<dyn Serializer<T>>,
    pub deserializer: Arc<dyn Deserializer<T>>,
    pub order: Arc<CmpFn<T>>,
    pub equality: Arc<EqFn<T>>,
}

impl<T: 'static> Settings<T> {
    pub fn new(
        serializer: Arc<dyn Serializer<T>>,
        deserializer: Arc<dyn Deserializer<T>>,
        order: Arc<CmpFn<T>>,
        equality: Arc<EqFn<T>>,
    ) -> Settings<T> {
        Settings {
            prefix: "synchrony-".into(),
            suffix_tmp: ".eftmp".into(),
            suffix_sav: ".efsav".into(),
            ave_sz: 1000,
            card_cap: 2000,
            ram_cap: 200_000_000,
            cap: 100_000,
            do_sampling: true,
            sampling_sz: 30,
            always_on_disk: false,
            serializer,
            deserializer,
            order,
            equality,
        }
    }

    /// Settings over a line format, with order and equality derived from
    /// the record's own `Ord` instance.
    pub fn for_format<F>(format: F) -> Settings<T>
    where
        F: LineFormat<Record = T>,
        T: Ord + Clone,
    {
        let codec = Arc::new(LineCodec::new(format));
        Settings::new(
            Arc::clone(&codec) as Arc<dyn Serializer<T>>,
            codec,
            Arc::new(|a: &T, b: &T| a.cmp(b)),
            Arc::new(|a: &T, b: &T| a == b),
        )
    }
}

/// Lifts a boolean "strictly less than" predicate into a total ordering by
/// examining both directions.
///
/// The predicate must describe a real total order; an inconsistent one
/// yields nondeterministic tie-breaks in sort and merge.
pub fn order_from_lt<T>(lt: impl Send + Sync + 'static + Fn(&T, &T) -> bool) -> Arc<CmpFn<T>> {
    Arc::new(move |a, b| {
        if lt(a, b) {
            Ordering::Less
        } else if lt(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifted_order_examines_both_directions() {
        let cmp = order_from_lt(|a: &u32, b: &u32| a < b);
        assert_eq!(cmp(&1, &2), Ordering::Less);
        assert_eq!(cmp(&2, &1), Ordering::Greater);
        assert_eq!(cmp(&7, &7), Ordering::Equal);
    }
}
