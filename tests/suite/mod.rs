mod hex;
mod jemalloc;
mod process;
mod ptmalloc;
