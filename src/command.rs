pub trait OpCode {
    fn op_code(&self) -> u8;
}

/// ROM level commands understood by every device on the bus
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
pub enum Command {
    SearchRom = 0xF0,
    ReadRom = 0x33,
    MatchRom = 0x55,
    SkipRom = 0xCC,
    AlarmSearch = 0xEC,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}
