//! The `base` crate defines the things which are useful both to the
//! simulator control program and to any other tool built around the
//! simulator: addresses, command switches, the quoted-string codec
//! used by expect and send, and a keyed priority queue.  The idea is
//! that a tool which only needs to read or write these things would
//! depend on the base crate but would not need to depend on the
//! simulator library itself.

mod quoting;
mod switches;
mod types;

pub mod collections;
pub mod prelude;

#[test]
fn test_prelude_exports() {
    use prelude::*;
    let sw = Switches::letter('P') | Switches::letter('C');
    assert_eq!(sw.to_string(), "-CP");
    let addr: Address = "17".parse().expect("test data should be valid");
    assert_eq!(u32::from(addr), 15);
    assert_eq!(decode_quoted_string("\"hi\\n\""), Ok(b"hi\n".to_vec()));
}
