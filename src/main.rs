#![no_std]
#![no_main]

// The boot stage (16->32-bit bootstrap, GDT/TSS, ELF load) is an external
// collaborator (spec SS1/SS6); by the time `_start` runs here it has already
// handed off in 32-bit protected mode with the boot page directory
// installed, so this entry point does nothing but jump into `kernel::kmain`.

#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel::kmain()
}
