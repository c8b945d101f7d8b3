//! Host functions a program can reach through `extern`, e.g.
//! `extern putchard(c)`. The JIT maps their declarations to these addresses.

use std::io::Write;

/// writes the character with the given code to stderr
pub extern "C" fn putchard(x: f64) -> f64 {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(&[x as u8]);
    let _ = stderr.flush();
    0.0
}

/// writes the value on its own line to stderr
pub extern "C" fn printd(x: f64) -> f64 {
    eprintln!("{}", x);
    0.0
}

pub fn builtin_address(name: &str) -> Option<usize> {
    match name {
        "putchard" => Some(putchard as usize),
        "printd" => Some(printd as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_known() {
        assert_eq!(builtin_address("putchard"), Some(putchard as usize));
        assert_eq!(builtin_address("printd"), Some(printd as usize));
        assert_eq!(builtin_address("sin"), None);
    }

    #[test]
    fn builtins_return_zero() {
        assert_eq!(printd(1.5), 0.0);
        assert_eq!(putchard(10.0), 0.0);
    }
}
