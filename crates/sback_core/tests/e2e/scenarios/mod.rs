mod crash_recovery;
mod dedup;
mod properties;
mod roundtrip;
