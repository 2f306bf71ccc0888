// Select line of a relay driver board
//
// One relay driver serves every board; a board only listens while its
// select line is high. Holding a `SelectLine` borrows the pins exclusively,
// so two boards can never be selected at once.

use crate::hal::Pins;

pub struct SelectLine<'a> {
    pins: &'a mut dyn Pins,
    pin: u8,
}

impl<'a> SelectLine<'a> {
    /// Drive the select pin high until the guard is dropped
    pub fn assert(pins: &'a mut dyn Pins, pin: u8) -> Self {
        pins.digital_write(pin, true);
        Self { pins, pin }
    }
}

impl Drop for SelectLine<'_> {
    fn drop(&mut self) {
        self.pins.digital_write(self.pin, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Event, Sim};

    #[test]
    fn test_released_on_early_return() {
        let sim = Sim::new();
        let mut hw = sim.hardware(0);

        fn send(pins: &mut dyn Pins, fail: bool) -> Result<(), ()> {
            let _select = SelectLine::assert(pins, 30);
            if fail {
                return Err(());
            }
            Ok(())
        }
        assert!(send(hw.pins.as_mut(), true).is_err());

        assert_eq!(
            sim.events(),
            vec![
                Event::PinWrite { pin: 30, high: true },
                Event::PinWrite {
                    pin: 30,
                    high: false
                },
            ]
        );
    }
}
