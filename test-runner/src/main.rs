//! hmvm-emu: runs a sample contract against the emulator
//!
//! The contract adds its two arguments, stores a value, emits an event,
//! records the sum in a second contract through a nested call and commits.
//!
//! ```text
//! RUST_LOG=debug hmvm-emu 20 22
//! ```

use anyhow::{bail, Context, Result};
use hmvm_program_runtime::{invoke_context::abbreviate, Address};
use hmvm_test_runner::{Emulator, Session};

const ADDER: Address = [0x01; 20];
const LEDGER: Address = [0x02; 20];
const ALICE: Address = [0xa1; 20];

fn adder(session: &mut Session<'_>) -> Result<i64> {
    let x: i64 = session.arg_str(0)?.parse().context("first argument is not an integer")?;
    let y: i64 = session.arg_str(1)?.parse().context("second argument is not an integer")?;
    let sum = x.checked_add(y).context("sum overflows")?;
    session.log(&sum.to_string())?;

    session.write_state(b"key", b"value")?;
    session.emit_event(b"test-event", b"key")?;

    let (_, receipt) = session.call(&LEDGER, [sum.to_string()], ledger)?;
    log::info!("ledger replied {:?}", String::from_utf8_lossy(&receipt));

    session.set_response(b"ok")?;
    Ok(sum)
}

fn ledger(session: &mut Session<'_>) -> Result<()> {
    let caller = session.sender()?;
    let total = session.arg(0)?;
    session.write_state(b"last-sum", &total)?;
    session.write_state(b"last-caller", &caller)?;
    session.set_response(format!("recorded for {}", abbreviate(&caller)).as_bytes())?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        args = vec!["1".into(), "2".into()];
    }
    if args.len() != 2 {
        bail!("usage: hmvm-emu <x> <y>");
    }

    let emulator = Emulator::new();
    let sum = emulator.exec_contract(ADDER, ALICE, &args, |session| {
        let sum = adder(session)?;
        session.commit_state()?;

        let stored = String::from_utf8(session.read_state(b"key")?)?;
        let response = String::from_utf8(session.response()?)?;
        let event = String::from_utf8(session.event(b"test-event", 0)?)?;
        println!("state key = {stored}, response = {response}, event test-event[0] = {event}");
        Ok::<_, anyhow::Error>(sum)
    })?;
    println!("{} + {} = {}", args[0], args[1], sum);

    let recorded = emulator.exec_contract(LEDGER, ALICE, std::iter::empty::<&[u8]>(), |session| {
        Ok::<_, anyhow::Error>(session.read_state(b"last-sum")?)
    })?;
    println!("ledger last-sum = {}", String::from_utf8(recorded)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adder_records_sum_in_ledger() {
        let emulator = Emulator::new();
        let sum = emulator
            .exec_contract(ADDER, ALICE, ["20", "22"], |session| {
                let sum = adder(session)?;
                session.commit_state()?;
                Ok::<_, anyhow::Error>(sum)
            })
            .unwrap();
        assert_eq!(sum, 42);

        let recorded = emulator
            .exec_contract(LEDGER, ALICE, std::iter::empty::<&[u8]>(), |session| {
                Ok::<_, anyhow::Error>(session.read_state(b"last-sum")?)
            })
            .unwrap();
        assert_eq!(recorded, b"42");
    }

    #[test]
    fn test_adder_rejects_overflowing_sum() {
        let emulator = Emulator::new();
        let max = i64::MAX.to_string();
        let err = emulator
            .exec_contract(ADDER, ALICE, [max.as_str(), "1"], adder)
            .unwrap_err();
        assert_eq!(err.to_string(), "sum overflows");
    }
}
