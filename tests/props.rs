mod common;

use common::{cell_key, get_cell, read_cell, CellRecord};
use eventbox::{
    emit, list, process_batch, Access, EVersion, Error, Event, EventId, MemoryStore, Processor,
    Transition,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Consumes the events selected by `take` (cycled over the batch), split
/// across two threaded transitions. The state counts consumed events.
struct Picky {
    index: i64,
    take: Vec<bool>,
}

impl Picky {
    fn picks<'a>(&self, events: &'a [Event]) -> Vec<&'a Event> {
        events
            .iter()
            .enumerate()
            .filter(|(i, _)| self.take[i % self.take.len()])
            .map(|(_, e)| e)
            .collect()
    }
}

impl Processor for Picky {
    type State = i64;

    fn load_state(&self, db: &dyn Access) -> Result<(i64, EVersion), Error> {
        let cell = read_cell(db, self.index)?;
        Ok((cell.population, cell.eversion))
    }

    fn fetch_eversion(&self, db: &dyn Access) -> Result<EVersion, Error> {
        Ok(read_cell(db, self.index)?.eversion)
    }

    fn mutate(&self, events: &[Event], state: &i64) -> Result<Vec<Transition<i64>>, Error> {
        let picks = self.picks(events);
        if picks.is_empty() {
            return Ok(Vec::new());
        }
        let (first, second) = picks.split_at(picks.len() / 2);
        let after_first = *state + first.len() as i64;
        Ok(vec![
            Transition::to(after_first).consuming(first.iter().copied()),
            Transition::to(after_first + second.len() as i64).consuming(second.iter().copied()),
        ])
    }

    fn save_state(&self, db: &dyn Access, state: i64, eversion: EVersion) -> Result<(), Error> {
        let record = CellRecord {
            eversion,
            population: state,
        };
        db.put(
            &cell_key(self.index),
            serde_json::to_vec(&record).map_err(Error::other)?,
        )?;
        Ok(())
    }
}

// Whatever a processor consumes disappears, everything else stays queued.
proptest! {
    #[test]
    fn prop_consumption_exactness(
        n in 0..30usize,
        take in proptest::collection::vec(any::<bool>(), 1..8),
    ) {
        let store = MemoryStore::new();
        let recipient = cell_key(1);
        for i in 0..n {
            emit(&store, i.to_string().into_bytes(), &recipient).unwrap();
        }

        let original = list(&store, &recipient).unwrap();
        let processor = Picky { index: 1, take };
        let consumed: BTreeSet<EventId> = processor
            .picks(&original)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();

        process_batch(&store, &recipient, &processor).unwrap();

        let remaining: Vec<EventId> = list(&store, &recipient)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        let expected: Vec<EventId> = original
            .iter()
            .map(|e| e.id.clone())
            .filter(|id| !consumed.contains(id))
            .collect();
        prop_assert_eq!(remaining, expected);

        let cell = get_cell(&store, 1);
        prop_assert_eq!(cell.population, consumed.len() as i64);
        let expected_ev = if consumed.is_empty() { 0 } else { 1 };
        prop_assert_eq!(cell.eversion, EVersion(expected_ev));
    }
}

// Events come back in the order they were emitted, payloads intact.
proptest! {
    #[test]
    fn prop_emit_order(payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 0..40)) {
        let store = MemoryStore::new();
        let recipient = cell_key(2);
        for p in &payloads {
            emit(&store, p.clone(), &recipient).unwrap();
        }

        let listed: Vec<Vec<u8>> = list(&store, &recipient)
            .unwrap()
            .into_iter()
            .map(|e| e.value)
            .collect();
        prop_assert_eq!(listed, payloads);
    }
}

// EVersion advances by exactly one per committing batch, however many
// transitions the batch had.
proptest! {
    #[test]
    fn prop_eversion_steps_by_one(rounds in proptest::collection::vec(1..5usize, 1..10)) {
        let store = MemoryStore::new();
        let recipient = cell_key(3);
        let processor = Picky { index: 3, take: vec![true] };

        for (round, &count) in rounds.iter().enumerate() {
            for _ in 0..count {
                emit(&store, b"x".to_vec(), &recipient).unwrap();
            }
            process_batch(&store, &recipient, &processor).unwrap();
            prop_assert_eq!(get_cell(&store, 3).eversion, EVersion(round as u64 + 1));
        }
        let total: usize = rounds.iter().sum();
        prop_assert_eq!(get_cell(&store, 3).population, total as i64);
    }
}
