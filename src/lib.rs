// Module naming follows project convention (Core, Queue and Transport are
// capitalised like the rest of the DMXP family)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Queue;
#[allow(non_snake_case)]
pub mod Transport;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod ffi;
