//! Run the `counter` program and check its output.

use assert_cmd::Command;

#[test]
fn counter_counts_to_twenty_thousand() {
    Command::cargo_bin("counter")
        .unwrap()
        .assert()
        .stdout("20000\n")
        .success();
}
