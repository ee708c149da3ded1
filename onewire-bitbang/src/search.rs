use heapless::Vec;
use log::{debug, trace, warn};

use crate::{
    ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_SEARCH_CMD, OneWire, OneWireResult, Rom,
    error::OneWireError,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Type of search performed using [`OneWireSearch`].
pub enum OneWireSearchKind {
    /// Normal search
    Normal = ONEWIRE_SEARCH_CMD,
    /// Search only for devices with alarm
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

/// State of the [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html)
/// for one bus.
///
/// The state is independent of the bus so it can be kept across borrows of
/// the bus; [`OneWireSearch`] bundles it with a bus reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    cmd: u8,
    last_device: bool,
    last_discrepancy: u8,
    last_family_discrepancy: u8,
    family: u8,
    rom: [u8; 8],
}

impl SearchState {
    /// Creates a fresh search state.
    pub fn new(kind: OneWireSearchKind) -> Self {
        Self {
            cmd: kind as _,
            last_device: false,
            last_discrepancy: 0,
            last_family_discrepancy: 0,
            family: 0,
            rom: [0; 8],
        }
    }

    /// Creates a search state restricted to devices of `family`.
    pub fn with_family(kind: OneWireSearchKind, family: u8) -> Self {
        let mut state = Self::new(kind);
        state.target(family);
        state
    }

    /// Resets the search state so the next search starts from the beginning.
    /// Also drops a family target.
    pub fn reset(&mut self) {
        self.last_device = false;
        self.last_discrepancy = 0;
        self.last_family_discrepancy = 0;
        self.family = 0;
        self.rom = [0; 8];
    }

    /// Starts over after an aborted pass, keeping a family target.
    fn restart(&mut self) {
        let family = self.family;
        self.reset();
        if family != 0 {
            self.target(family);
        }
    }

    /// Sets up the search to find devices of `family` only.
    ///
    /// The first search after this lands on the lowest device of the family,
    /// if any; the search ends as soon as it leaves the family.
    pub fn target(&mut self, family: u8) {
        self.rom = [family, 0, 0, 0, 0, 0, 0, 0];
        self.last_discrepancy = 64;
        self.last_family_discrepancy = 0;
        self.last_device = false;
        self.family = family;
    }

    /// Skips the remaining devices of the family found last, so that the next
    /// search continues with the next family on the bus.
    pub fn skip_family(&mut self) {
        self.last_discrepancy = self.last_family_discrepancy;
        self.last_family_discrepancy = 0;
        self.family = 0;
        if self.last_discrepancy == 0 {
            self.last_device = true;
        }
    }

    /// True once every device has been found.
    pub fn is_exhausted(&self) -> bool {
        self.last_device
    }

    /// Searches for the next device on the 1-Wire bus.
    ///
    /// Devices are found in a fixed order, lowest ROM code first when the
    /// code is read least significant bit first. Once every device has been
    /// found this returns `None` without touching the bus, until the state is
    /// [reset](SearchState::reset).
    ///
    /// A bus without presence pulse, a search slot nobody answers, or a code
    /// with a zero family byte all end the search with `None` and start it
    /// over. A family target survives this, so retrying still only yields
    /// devices of that family.
    ///
    /// # Errors
    /// [`OneWireError::InvalidCrc`] if the code found fails its CRC. The
    /// search has moved past that code, so calling this again continues with
    /// the next device.
    pub fn next<T: OneWire>(
        &mut self,
        onewire: &mut T,
    ) -> Result<Option<Rom>, OneWireError<T::BusError>> {
        if self.last_device {
            return Ok(None);
        }
        let rom = match self.pass(onewire) {
            Ok(rom) => rom,
            Err(OneWireError::NoDevicePresent) => {
                debug!("1-Wire search: no presence pulse");
                self.restart();
                return Ok(None);
            }
            Err(OneWireError::BusCollision) => {
                warn!("1-Wire search aborted: no device answered the search slot");
                self.restart();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if rom.family() == 0 {
            self.restart();
            return Ok(None);
        }
        if !rom.is_valid() {
            warn!("1-Wire search: CRC mismatch on {rom}");
            return Err(OneWireError::InvalidCrc);
        }
        if self.family != 0 && rom.family() != self.family {
            // Ran past the targeted family
            self.last_device = true;
            return Ok(None);
        }
        debug!("1-Wire search found {rom}");
        Ok(Some(rom))
    }

    /// One pass over the 64 ROM bits.
    fn pass<T: OneWire>(&mut self, onewire: &mut T) -> OneWireResult<Rom, T::BusError> {
        if !onewire.reset()? {
            return Err(OneWireError::NoDevicePresent);
        }
        onewire.write_byte(self.cmd)?;
        let mut last_zero: u8 = 0;
        for id_bit_num in 1..=64u8 {
            let idx = ((id_bit_num - 1) / 8) as usize;
            let rom_mask = 1u8 << ((id_bit_num - 1) % 8);
            // Direction to take if the devices disagree on this bit
            let dir = if id_bit_num < self.last_discrepancy {
                self.rom[idx] & rom_mask > 0
            } else {
                id_bit_num == self.last_discrepancy
            };
            let (id_bit, complement_bit, taken) = onewire.read_triplet(dir)?;
            if id_bit && complement_bit {
                return Err(OneWireError::BusCollision);
            }
            if !id_bit && !complement_bit && !taken {
                last_zero = id_bit_num;
                if last_zero < 9 {
                    self.last_family_discrepancy = last_zero;
                }
            }
            if taken {
                self.rom[idx] |= rom_mask;
            } else {
                self.rom[idx] &= !rom_mask;
            }
        }
        self.last_discrepancy = last_zero;
        self.last_device = last_zero == 0;
        trace!(
            "1-Wire search pass done, last discrepancy {}, last family discrepancy {}",
            self.last_discrepancy,
            self.last_family_discrepancy
        );
        Ok(Rom::from(self.rom))
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// This resets the search state, and calling [next](SearchState::next) after this call will start a new search.
    pub fn verify<T: OneWire>(
        &mut self,
        onewire: &mut T,
        rom: &Rom,
    ) -> Result<bool, OneWireError<T::BusError>> {
        self.reset();
        self.rom = *rom.as_bytes();
        self.last_discrepancy = 64;
        let found = self.next(onewire);
        self.reset();
        Ok(found? == Some(*rom))
    }

    /// Restarts the search and collects up to `N` ROM codes.
    ///
    /// A family target set with [`target`](SearchState::target) is kept.
    /// Codes that fail their CRC are skipped, the search continues with the
    /// next device.
    pub fn enumerate<T: OneWire, const N: usize>(
        &mut self,
        onewire: &mut T,
    ) -> Result<Vec<Rom, N>, OneWireError<T::BusError>> {
        let family = self.family;
        self.reset();
        if family != 0 {
            self.target(family);
        }
        let mut roms = Vec::new();
        while !roms.is_full() {
            let rom = match self.next(onewire) {
                Ok(Some(rom)) => rom,
                Ok(None) => break,
                Err(OneWireError::InvalidCrc) => continue,
                Err(e) => return Err(e),
            };
            if roms.push(rom).is_err() {
                break;
            }
        }
        Ok(roms)
    }
}

/// A structure for searching devices on a 1-Wire bus.
/// This structure implements the search algorithm for discovering devices on the 1-Wire bus.
/// It maintains the state of the search, and holds the bus exclusively while it does.
pub struct OneWireSearch<'a, T> {
    onewire: &'a mut T,
    state: SearchState,
}

impl<T> core::fmt::Debug for OneWireSearch<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OneWireSearch")
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `cmd` - The kind of search, normal or alarmed devices only.
    pub fn new(onewire: &'a mut T, cmd: OneWireSearchKind) -> Self {
        Self::from_state(onewire, SearchState::new(cmd))
    }

    /// Creates a new [`OneWireSearch`] instance with a specific family code.
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `cmd` - The kind of search, normal or alarmed devices only.
    /// * `family` - The family code of the devices to search for.
    pub fn with_family(onewire: &'a mut T, cmd: OneWireSearchKind, family: u8) -> Self {
        Self::from_state(onewire, SearchState::with_family(cmd, family))
    }

    /// Resumes a search from a saved state.
    pub fn from_state(onewire: &'a mut T, state: SearchState) -> Self {
        Self { onewire, state }
    }

    /// Releases the bus, keeping the search state.
    pub fn into_state(self) -> SearchState {
        self.state
    }

    /// Current search state.
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Resets the search state. See [`SearchState::reset`].
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Targets one family. See [`SearchState::target`].
    pub fn target(&mut self, family: u8) {
        self.state.target(family);
    }

    /// Skips the current family. See [`SearchState::skip_family`].
    pub fn skip_family(&mut self) {
        self.state.skip_family();
    }
}

impl<T: OneWire> OneWireSearch<'_, T> {
    /// Searches for devices on the 1-Wire bus.
    /// This method implements the [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html) to discover devices connected to the bus.
    /// The [next](OneWireSearch::next) method can be called repeatedly to find all devices on the bus.
    /// At the end of the search, calling this method will return `None` to indicate that no more devices are present.
    /// See [`SearchState::next`] for the error cases.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Rom>, OneWireError<T::BusError>> {
        self.state.next(&mut *self.onewire)
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// This functions resets the search state, and calling [next](OneWireSearch::next) after this call will start a new search.
    pub fn verify(&mut self, rom: &Rom) -> Result<bool, OneWireError<T::BusError>> {
        self.state.verify(&mut *self.onewire, rom)
    }

    /// Restarts the search and collects up to `N` ROM codes, skipping codes
    /// that fail their CRC.
    pub fn enumerate<const N: usize>(&mut self) -> Result<Vec<Rom, N>, OneWireError<T::BusError>> {
        self.state.enumerate(&mut *self.onewire)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec as StdVec;

    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        OneWireMaster,
        sim::{SimDevice, SimLine},
    };

    fn bus<const N: usize>(roms: &[Rom]) -> SimLine<N> {
        roms.iter()
            .fold(SimLine::new(), |line, &rom| line.with_device(SimDevice::new(rom)))
    }

    fn search_order(rom: &Rom) -> u64 {
        u64::from(*rom).reverse_bits()
    }

    fn random_roms(rng: &mut StdRng, count: usize) -> StdVec<Rom> {
        let mut roms = StdVec::new();
        while roms.len() < count {
            let family = match rng.random_range(0..3) {
                0 => 0x10,
                1 => 0x28,
                _ => rng.random_range(1..=0xff),
            };
            let rom = Rom::new(family, rng.random::<u64>() & 0xffff_ffff_ffff);
            if !roms.contains(&rom) {
                roms.push(rom);
            }
        }
        roms
    }

    /// Ghost presence with nobody answering the search slots.
    struct SilentBus;

    impl OneWire for SilentBus {
        type BusError = ();

        fn reset(&mut self) -> OneWireResult<bool, ()> {
            Ok(true)
        }

        fn write_bit(&mut self, _bit: bool) -> OneWireResult<(), ()> {
            Ok(())
        }

        fn read_bit(&mut self) -> OneWireResult<bool, ()> {
            Ok(true)
        }

        fn power(&mut self) -> OneWireResult<(), ()> {
            Ok(())
        }

        fn depower(&mut self) -> OneWireResult<(), ()> {
            Ok(())
        }
    }

    /// Misses the first `missed` presence pulses of the wrapped bus.
    struct FlakyPresence<'a, T> {
        inner: &'a mut T,
        missed: u32,
    }

    impl<T: OneWire> OneWire for FlakyPresence<'_, T> {
        type BusError = T::BusError;

        fn reset(&mut self) -> OneWireResult<bool, T::BusError> {
            let present = self.inner.reset()?;
            if self.missed > 0 {
                self.missed -= 1;
                return Ok(false);
            }
            Ok(present)
        }

        fn write_bit(&mut self, bit: bool) -> OneWireResult<(), T::BusError> {
            self.inner.write_bit(bit)
        }

        fn read_bit(&mut self) -> OneWireResult<bool, T::BusError> {
            self.inner.read_bit()
        }

        fn power(&mut self) -> OneWireResult<(), T::BusError> {
            self.inner.power()
        }

        fn depower(&mut self) -> OneWireResult<(), T::BusError> {
            self.inner.depower()
        }
    }

    #[test]
    fn single_device() {
        let rom = Rom::from([0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xa2]);
        let mut line = bus::<1>(&[rom]);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        assert_eq!(search.next().unwrap(), Some(rom));
        assert!(search.state().is_exhausted());
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn empty_bus_finds_nothing() {
        let mut line = SimLine::<1>::new();
        let mut master = OneWireMaster::new(&mut line).unwrap();
        assert!(!master.reset().unwrap());
        let mut state = SearchState::new(OneWireSearchKind::Normal);
        assert_eq!(state.next(&mut master).unwrap(), None);
        assert_eq!(state, SearchState::new(OneWireSearchKind::Normal));
    }

    #[test]
    fn exhausted_search_leaves_bus_alone() {
        let roms = [Rom::new(0x28, 1), Rom::new(0x28, 2), Rom::new(0x10, 3)];
        let mut line = bus::<3>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut state = SearchState::new(OneWireSearchKind::Normal);
        while state.next(&mut master).unwrap().is_some() {}
        assert!(state.is_exhausted());
        let resets = master.line().reset_count();
        let slots = master.line().slot_count();
        let now = master.line().now_us();
        for _ in 0..3 {
            assert_eq!(state.next(&mut master).unwrap(), None);
        }
        assert_eq!(master.line().reset_count(), resets);
        assert_eq!(master.line().slot_count(), slots);
        assert_eq!(master.line().now_us(), now);
    }

    #[test]
    fn enumerates_random_populations() {
        let mut rng = StdRng::seed_from_u64(0x1_3173);
        for _ in 0..20 {
            let count = rng.random_range(1..=12);
            let roms = random_roms(&mut rng, count);
            let mut line = bus::<12>(&roms);
            let mut master = OneWireMaster::new(&mut line).unwrap();
            let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);

            let first = search.enumerate::<16>().unwrap();
            let second = search.enumerate::<16>().unwrap();
            assert_eq!(first, second, "order must be stable");

            let mut expected = roms.clone();
            expected.sort_by_key(search_order);
            assert_eq!(first.as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn enumerate_stops_at_capacity() {
        let roms = [Rom::new(0x28, 1), Rom::new(0x28, 2), Rom::new(0x28, 3)];
        let mut line = bus::<3>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        assert_eq!(search.enumerate::<2>().unwrap().len(), 2);
        assert_eq!(search.enumerate::<8>().unwrap().len(), 3);
    }

    #[test]
    fn targeted_search_stays_in_family() {
        let roms = [
            Rom::new(0x10, 0x0000_0000_00a1),
            Rom::new(0x28, 0x0000_0000_0b02),
            Rom::new(0x10, 0x0000_0000_0c03),
            Rom::new(0x28, 0x0000_00d0_0004),
            Rom::new(0x28, 0x0000_0000_0005),
        ];
        let mut line = bus::<5>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::with_family(&mut master, OneWireSearchKind::Normal, 0x28);
        let mut found = StdVec::new();
        while let Some(rom) = search.next().unwrap() {
            found.push(rom);
        }
        let mut expected: StdVec<Rom> = roms.iter().copied().filter(|r| r.family() == 0x28).collect();
        expected.sort_by_key(search_order);
        assert_eq!(found, expected);

        // Targeting is kept across enumerations.
        search.target(0x10);
        let tens = search.enumerate::<8>().unwrap();
        assert_eq!(tens.len(), 2);
        assert!(tens.iter().all(|r| r.family() == 0x10));
    }

    #[test]
    fn targeted_search_for_missing_family() {
        let roms = [Rom::new(0x10, 1), Rom::new(0x28, 2)];
        let mut line = bus::<2>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::with_family(&mut master, OneWireSearchKind::Normal, 0x42);
        assert_eq!(search.next().unwrap(), None);
        search.reset();
        assert_eq!(search.enumerate::<4>().unwrap().len(), 2);
    }

    #[test]
    fn skip_family_moves_to_next_family() {
        let roms = [
            Rom::new(0x10, 0x11),
            Rom::new(0x10, 0x22),
            Rom::new(0x28, 0x33),
            Rom::new(0x28, 0x44),
        ];
        let mut line = bus::<4>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        let first = search.next().unwrap().unwrap();
        assert_eq!(first.family(), 0x10);
        search.skip_family();
        let next = search.next().unwrap().unwrap();
        assert_eq!(next.family(), 0x28);
        let last = search.next().unwrap().unwrap();
        assert_eq!(last.family(), 0x28);
        assert_ne!(last, next);
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn alarm_search_finds_alarmed_devices_only() {
        let hot = Rom::new(0x28, 0x0000_0000_0bad);
        let mut line = SimLine::<3>::new()
            .with_device(SimDevice::new(Rom::new(0x28, 1)))
            .with_device(SimDevice::new(hot).with_alarm(true))
            .with_device(SimDevice::new(Rom::new(0x10, 2)));
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Alarmed);
        assert_eq!(search.next().unwrap(), Some(hot));
        assert_eq!(search.next().unwrap(), None);
    }

    #[test]
    fn alarm_search_without_alarms_is_aborted() {
        let mut line = bus::<2>(&[Rom::new(0x28, 1), Rom::new(0x10, 2)]);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut state = SearchState::new(OneWireSearchKind::Alarmed);
        assert_eq!(state.next(&mut master).unwrap(), None);
        assert!(!state.is_exhausted());
    }

    #[test]
    fn verify_present_and_absent() {
        let roms = [Rom::new(0x28, 1), Rom::new(0x28, 2), Rom::new(0x10, 3)];
        let mut line = bus::<3>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        for rom in &roms {
            assert!(search.verify(rom).unwrap(), "{rom} should be present");
        }
        assert!(!search.verify(&Rom::new(0x28, 4)).unwrap());
        assert!(!search.verify(&Rom::new(0x42, 1)).unwrap());
        assert_eq!(search.state(), &SearchState::new(OneWireSearchKind::Normal));
    }

    #[test]
    fn silent_bus_aborts_and_restarts() {
        let mut bus = SilentBus;
        let mut state = SearchState::new(OneWireSearchKind::Normal);
        assert_eq!(state.next(&mut bus), Ok(None));
        assert_eq!(state, SearchState::new(OneWireSearchKind::Normal));
        assert!(!state.is_exhausted());

        let mut state = SearchState::with_family(OneWireSearchKind::Normal, 0x28);
        assert_eq!(state.next(&mut bus), Ok(None));
        assert_eq!(
            state,
            SearchState::with_family(OneWireSearchKind::Normal, 0x28)
        );
        assert!(!state.is_exhausted());
    }

    #[test]
    fn targeted_search_keeps_family_after_missed_presence() {
        let roms = [Rom::new(0x10, 1), Rom::new(0x28, 2)];
        let mut line = bus::<2>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut bus = FlakyPresence {
            inner: &mut master,
            missed: 1,
        };
        let mut state = SearchState::with_family(OneWireSearchKind::Normal, 0x28);
        assert_eq!(state.next(&mut bus).unwrap(), None);
        assert!(!state.is_exhausted());

        let mut found = StdVec::new();
        while let Some(rom) = state.next(&mut bus).unwrap() {
            found.push(rom);
        }
        assert_eq!(found, [Rom::new(0x28, 2)]);
    }

    #[test]
    fn enumerate_skips_corrupt_codes() {
        let bad = Rom::from_bytes([0x28, 1, 2, 3, 4, 5, 6, 0]);
        let good = Rom::new(0x28, 0x0000_0000_ff00);
        let other = Rom::new(0x10, 0x0000_0000_0001);
        // Found after the corrupt code
        let last = Rom::new(0x28, 0x0000_0000_0003);
        let mut line = bus::<4>(&[bad, good, other, last]);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        let mut expected = [good, other, last];
        expected.sort_by_key(search_order);
        assert_eq!(search.enumerate::<4>().unwrap().as_slice(), expected.as_slice());
    }

    #[test]
    fn corrupt_code_is_reported() {
        let bad = Rom::from_bytes([0x28, 1, 2, 3, 4, 5, 6, 0]);
        let good = Rom::new(0x28, 0x0000_0000_ff00);
        let mut line = bus::<2>(&[bad, good]);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        let mut found = StdVec::new();
        let mut crc_errors = 0;
        loop {
            match search.next() {
                Ok(Some(rom)) => found.push(rom),
                Ok(None) => break,
                Err(OneWireError::InvalidCrc) => crc_errors += 1,
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert_eq!(crc_errors, 1);
        assert_eq!(found, [good]);
    }

    #[test]
    fn state_survives_bus_borrow() {
        let roms = [Rom::new(0x28, 1), Rom::new(0x28, 2)];
        let mut line = bus::<2>(&roms);
        let mut master = OneWireMaster::new(&mut line).unwrap();
        let mut search = OneWireSearch::new(&mut master, OneWireSearchKind::Normal);
        let first = search.next().unwrap().unwrap();
        let state = search.into_state();
        // Bus is free for other transactions in between.
        assert!(master.reset().unwrap());
        let mut search = OneWireSearch::from_state(&mut master, state);
        let second = search.next().unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(search.next().unwrap(), None);
    }
}
