//! `config` — emits an empty JSON document on stdout and exits 0. This
//! satisfies the host runner's contract that the executor may alter its
//! config between invocations; this executor never does.

pub fn run() {
    println!("{{}}");
}
