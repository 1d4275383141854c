//
// Shiva ELF interpreter and patch engine
//
pub mod cstr;
pub mod math;
