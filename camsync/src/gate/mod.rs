use crate::errors::HarnessError;

/// A binary lock. At most one holder between a successful `acquire` and the matching `release`.
pub trait Gate {
    /// Blocks until exclusive access is granted.
    fn acquire(&self) -> Result<(), HarnessError>;

    fn release(&self) -> Result<(), HarnessError>;
}

/// A held gate. Released by `leave`, or on drop if the holder unwinds.
pub struct Section<'a> {
    gate: &'a dyn Gate,
    held: bool,
}

impl<'a> Section<'a> {
    pub fn enter(gate: &'a dyn Gate) -> Result<Section<'a>, HarnessError> {
        gate.acquire()?;
        Ok(Section { gate: gate, held: true })
    }

    pub fn leave(mut self) -> Result<(), HarnessError> {
        self.held = false;
        self.gate.release()
    }
}

impl<'a> Drop for Section<'a> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.gate.release() {
                log::error!("releasing gate on drop: {}", e);
            }
        }
    }
}

/// The shared detection counter, paired with the one gate that protects it.
pub trait Tally {
    /// `None` when nothing is shared and increments are dropped.
    fn gate(&self) -> Option<&dyn Gate>;

    /// Adds one and returns the new value.
    ///
    /// # Safety
    /// The caller must hold `self.gate()`.
    unsafe fn add_one(&self) -> u64;

    /// # Safety
    /// The caller must hold `self.gate()`.
    unsafe fn load(&self) -> u64;
}

#[inline]
pub fn protected_increment<T: Tally + ?Sized>(tally: &T) -> Result<Option<u64>, HarnessError> {
    protected_increment_with(tally, |_| ())
}

/// Increments the counter inside the critical section and runs `inside` with the new value
/// before the gate is released.
pub fn protected_increment_with<T, F>(tally: &T, inside: F) -> Result<Option<u64>, HarnessError>
where
    T: Tally + ?Sized,
    F: FnOnce(u64),
{
    let gate = match tally.gate() {
        Some(gate) => gate,
        None => return Ok(None),
    };
    let section = Section::enter(gate)?;
    let value = unsafe { tally.add_one() };
    inside(value);
    section.leave()?;
    Ok(Some(value))
}

pub fn read_total<T: Tally + ?Sized>(tally: &T) -> Result<Option<u64>, HarnessError> {
    let gate = match tally.gate() {
        Some(gate) => gate,
        None => return Ok(None),
    };
    let section = Section::enter(gate)?;
    let value = unsafe { tally.load() };
    section.leave()?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct RecordingGate {
        held: Cell<bool>,
        acquired: Cell<usize>,
        released: Cell<usize>,
    }

    impl Gate for RecordingGate {
        fn acquire(&self) -> Result<(), HarnessError> {
            if self.held.replace(true) {
                return Err(HarnessError::Logic("gate acquired twice".to_string()));
            }
            self.acquired.set(self.acquired.get() + 1);
            Ok(())
        }

        fn release(&self) -> Result<(), HarnessError> {
            if !self.held.replace(false) {
                return Err(HarnessError::Logic("gate released while free".to_string()));
            }
            self.released.set(self.released.get() + 1);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CellTally {
        gate: RecordingGate,
        value: Cell<u64>,
    }

    impl Tally for CellTally {
        fn gate(&self) -> Option<&dyn Gate> {
            Some(&self.gate)
        }

        unsafe fn add_one(&self) -> u64 {
            assert!(self.gate.held.get(), "counter touched outside the gate");
            self.value.set(self.value.get() + 1);
            self.value.get()
        }

        unsafe fn load(&self) -> u64 {
            assert!(self.gate.held.get(), "counter read outside the gate");
            self.value.get()
        }
    }

    struct Detached;

    impl Tally for Detached {
        fn gate(&self) -> Option<&dyn Gate> {
            None
        }

        unsafe fn add_one(&self) -> u64 {
            unreachable!()
        }

        unsafe fn load(&self) -> u64 {
            unreachable!()
        }
    }

    #[test]
    fn increment_holds_gate_around_hook() -> Result<(), HarnessError> {
        let tally = CellTally::default();
        let mut seen = Vec::new();
        for _ in 0..3 {
            protected_increment_with(&tally, |v| {
                assert!(tally.gate.held.get());
                seen.push(v);
            })?;
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(read_total(&tally)?, Some(3));
        assert_eq!(tally.gate.acquired.get(), 4);
        assert_eq!(tally.gate.released.get(), 4);
        assert!(!tally.gate.held.get());
        Ok(())
    }

    #[test]
    fn section_releases_when_holder_unwinds() {
        let gate = RecordingGate::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _section = Section::enter(&gate).unwrap();
            panic!("worker died inside the critical section");
        }));
        assert!(result.is_err());
        assert!(!gate.held.get());
        assert_eq!(gate.released.get(), 1);
    }

    #[test]
    fn detached_tally_shares_nothing() -> Result<(), HarnessError> {
        assert_eq!(protected_increment(&Detached)?, None);
        assert_eq!(read_total(&Detached)?, None);
        Ok(())
    }
}
