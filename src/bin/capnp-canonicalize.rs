//! The thin command-line shim: pipes raw Cap'n Proto messages from stdin
//! to their canonical form on stdout.
//!
//! ```text
//! capnp-canonicalize                          # Policy A (default)
//! capnp-canonicalize --zero-always-minus-one=false   # Policy B
//! <anything else>                             # usage text, exit 0
//! ```
//!
//! Argument handling is hand-rolled rather than pulled from a CLI crate:
//! the surface is exactly one optional flag, so matching on a slice of
//! `env::args()` directly is clearer than reaching for a parser built for
//! much larger surfaces.

use std::io::{self, Write};
use std::process::ExitCode;

use capnp_canonicalize::{canonicalize_stream, Error, ZeroPointerPolicy};

const USAGE: &str = "\
Usage: capnp-canonicalize [--zero-always-minus-one=false]

Reads non-packed Cap'n Proto messages from stdin, and writes their
canonical form to stdout.

  --zero-always-minus-one=false    When encoding a zero-size struct
                                    pointer, use its natural offset
                                    instead of always using -1.
";

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let policy = match args.as_slice() {
        [] => ZeroPointerPolicy::AlwaysMinusOne,
        [flag] if flag == "--zero-always-minus-one=false" => ZeroPointerPolicy::WhenAdjacent,
        _ => {
            print!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    match canonicalize_stream(&mut input, &mut output, policy) {
        Ok(()) => {
            let _ = output.flush();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("capnp-canonicalize: {}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &Error) -> ExitCode {
    match error {
        Error::Framing(_) => ExitCode::from(1),
        Error::MalformedPointer(_) => ExitCode::from(2),
        Error::Io(_) => ExitCode::from(3),
    }
}
