#![allow(dead_code)]

use eventbox::{emit, Access, EVersion, Error, Event, Key, Processor, Transition};
use serde::{Deserialize, Serialize};

pub fn cell_key(index: i64) -> Key {
    Key::new("cell", index.to_string())
}

/// Persisted state of one cell of the population automaton.
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub eversion: EVersion,
    pub population: i64,
}

pub fn read_cell(db: &dyn Access, index: i64) -> Result<CellRecord, Error> {
    match db.get(&cell_key(index))? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(Error::other),
        None => Ok(CellRecord::default()),
    }
}

pub fn get_cell(db: &dyn Access, index: i64) -> CellRecord {
    read_cell(db, index).unwrap()
}

/// A variant of the game of life on one cell of a row of cells.
///
/// Events are `+` (an immigrant arrives) and `-` (a neighbor advertises
/// for emigrants). With no events, an empty cell advertises to its right
/// neighbor and a small one grows by three.
pub struct CellProcessor {
    pub index: i64,
}

impl Processor for CellProcessor {
    type State = i64;

    fn load_state(&self, db: &dyn Access) -> Result<(i64, EVersion), Error> {
        let cell = read_cell(db, self.index)?;
        Ok((cell.population, cell.eversion))
    }

    fn fetch_eversion(&self, db: &dyn Access) -> Result<EVersion, Error> {
        Ok(read_cell(db, self.index)?.eversion)
    }

    fn mutate(&self, events: &[Event], state: &i64) -> Result<Vec<Transition<i64>>, Error> {
        let mut population = *state;
        let mut transitions = Vec::new();

        if events.is_empty() {
            if population == 0 {
                let neighbor = cell_key(self.index + 1);
                transitions.push(Transition::to(population).with_side_effect(move |db| {
                    emit(db, b"-".to_vec(), &neighbor)?;
                    Ok(())
                }));
            } else if population < 3 {
                population += 3;
                transitions.push(Transition::to(population));
            }
            return Ok(transitions);
        }

        let (minus, plus): (Vec<&Event>, Vec<&Event>) = events
            .iter()
            .partition(|e| e.value.first() == Some(&b'-'));

        if let Some(first) = plus.first() {
            // Welcome one newcomer per batch.
            population += 1;
            transitions.push(Transition::to(population).consuming([*first]));
        }

        if !minus.is_empty() {
            if population <= 1 {
                transitions.push(Transition::to(population).consuming(minus.iter().copied()));
            } else {
                population -= 1;
                let neighbor = cell_key(self.index - 1);
                transitions.push(
                    Transition::to(population)
                        .consuming(minus.iter().copied())
                        .with_side_effect(move |db| {
                            emit(db, b"+".to_vec(), &neighbor)?;
                            Ok(())
                        }),
                );
            }
        }
        Ok(transitions)
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

type LoadFn = Box<dyn Fn(&dyn Access) -> Result<(i64, EVersion), Error>>;
type FetchFn = Box<dyn Fn(&dyn Access) -> Result<EVersion, Error>>;
type MutateFn = Box<dyn Fn(&[Event], &i64) -> Result<Vec<Transition<i64>>, Error>>;
type SaveFn = Box<dyn Fn(&dyn Access, i64, EVersion) -> Result<(), Error>>;

/// Processor assembled from closures. Calling a method that was not
/// configured panics.
pub struct MockProcessor {
    load_state: LoadFn,
    fetch_eversion: Option<FetchFn>,
    mutate: Option<MutateFn>,
    save_state: Option<SaveFn>,
}

impl MockProcessor {
    pub fn new(
        load_state: impl Fn(&dyn Access) -> Result<(i64, EVersion), Error> + 'static,
    ) -> Self {
        MockProcessor {
            load_state: Box::new(load_state),
            fetch_eversion: None,
            mutate: None,
            save_state: None,
        }
    }

    /// A processor whose state is always `state` at `EVersion(0)`.
    pub fn at(state: i64) -> Self {
        Self::new(move |_| Ok((state, EVersion(0))))
    }

    pub fn fetch_eversion(
        mut self,
        f: impl Fn(&dyn Access) -> Result<EVersion, Error> + 'static,
    ) -> Self {
        self.fetch_eversion = Some(Box::new(f));
        self
    }

    pub fn mutate(
        mut self,
        f: impl Fn(&[Event], &i64) -> Result<Vec<Transition<i64>>, Error> + 'static,
    ) -> Self {
        self.mutate = Some(Box::new(f));
        self
    }

    pub fn save_state(
        mut self,
        f: impl Fn(&dyn Access, i64, EVersion) -> Result<(), Error> + 'static,
    ) -> Self {
        self.save_state = Some(Box::new(f));
        self
    }
}

impl Processor for MockProcessor {
    type State = i64;

    fn load_state(&self, db: &dyn Access) -> Result<(i64, EVersion), Error> {
        (self.load_state)(db)
    }

    fn fetch_eversion(&self, db: &dyn Access) -> Result<EVersion, Error> {
        (self.fetch_eversion.as_ref().expect("fetch_eversion not configured"))(db)
    }

    fn mutate(&self, events: &[Event], state: &i64) -> Result<Vec<Transition<i64>>, Error> {
        (self.mutate.as_ref().expect("mutate not configured"))(events, state)
    }

    fn save_state(&self, db: &dyn Access, state: i64, eversion: EVersion) -> Result<(), Error> {
        (self.save_state.as_ref().expect("save_state not configured"))(db, state, eversion)
    }
}
