use std::cell::Cell;
use std::rc::Rc;

use mrtd_terminal::iso7816::transport::{CardTransport, TransportError};


/// Replays a scripted APDU exchange at the raw transport level, asserting
/// every command byte-for-byte.
pub struct ScriptedTransport {
    exchanges: Vec<(Vec<u8>, Vec<u8>)>,
    position: Rc<Cell<usize>>,
}
impl ScriptedTransport {
    pub fn new(exchanges: Vec<(Vec<u8>, Vec<u8>)>) -> (Self, Rc<Cell<usize>>) {
        let position = Rc::new(Cell::new(0));
        let transport = Self {
            exchanges,
            position: Rc::clone(&position),
        };
        (transport, position)
    }
}
impl CardTransport for ScriptedTransport {
    fn open(&mut self) -> Result<(), TransportError> { Ok(()) }
    fn close(&mut self) -> Result<(), TransportError> { Ok(()) }
    fn is_open(&self) -> bool { true }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let position = self.position.get();
        let Some((expected, response)) = self.exchanges.get(position) else {
            panic!("unexpected command after script end: {:02X?}", command);
        };
        assert_eq!(
            command, expected.as_slice(),
            "command {} mismatched:\n     sent {:02X?}\n expected {:02X?}",
            position, command, expected,
        );
        self.position.set(position + 1);
        Ok(response.clone())
    }

    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }
}
