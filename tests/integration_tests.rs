//! Integration Tests

use std::collections::HashMap;
use std::fs::DirEntry;
use std::io;
use std::path::PathBuf;

use assert_cli::Assert;
use lazy_static::lazy_static;
use tempdir::TempDir;

trait AssertExt {
    fn exit_status_is(self, exit_status: i32) -> Self;
}

impl AssertExt for Assert {
    fn exit_status_is(self, exit_status: i32) -> Self {
        if exit_status == 0 {
            self.succeeds()
        } else {
            self.fails_with(exit_status)
        }
    }
}

struct ScriptData<'a> {
    pub stdout: &'a str,
    pub exit_status: i32,
}

lazy_static! {
    static ref JCSH_SCRIPTS_MAP: HashMap<&'static str, ScriptData<'static>> = {
        let mut map = HashMap::new();
        map.insert("simple_echo.jcsh", ScriptData { stdout: "test\n", exit_status: 0 });
        map.insert("simple_redirects.jcsh", ScriptData {
            stdout: "test output, please ignore\n",
            exit_status: 0
        });
        map.insert("simple_pipeline.jcsh", ScriptData { stdout: "needle\n", exit_status: 0 });
        map.insert("simple_sequence.jcsh", ScriptData { stdout: "one\ntwo\n", exit_status: 0 });
        map.insert("simple_exit_error.jcsh", ScriptData { stdout: "", exit_status: 85 });
        map.insert("simple_exit_large.jcsh", ScriptData { stdout: "", exit_status: 244 });
        map.insert("simple_exit_negative.jcsh", ScriptData { stdout: "", exit_status: 12 });
        map.insert("simple_last_status.jcsh", ScriptData { stdout: "", exit_status: 1 });
        map.insert("simple_command_not_found.jcsh", ScriptData { stdout: "", exit_status: 127 });
        map.insert("simple_syntax_error.jcsh", ScriptData { stdout: "", exit_status: 2 });
        map
    };
}

#[test]
fn test_all_simple_jcsh_scripts() {
    let simple_scripts = get_path_to_test_scripts()
        .read_dir()
        .expect("read_dir failed")
        .map(|entry| entry.expect("filename should be valid Unicode"))
        .filter(|entry| is_simple_jcsh_script(entry));

    for entry in simple_scripts {
        let temp_dir = generate_temp_directory().expect("unable to generate temp dir");
        let file_path = entry.path();
        let unicode_file_path = file_path
            .to_str()
            .expect("file path should be valid Unicode");
        let log_path = temp_dir.path().join("jcsh.log");
        let log_arg = format!("--log={}", log_path.display());

        let filename = entry.file_name();
        let expected_data = JCSH_SCRIPTS_MAP
            .get(filename.to_str().expect("filename should be valid Unicode"))
            .expect("simple script should have matching data in JCSH_SCRIPTS_MAP");

        Assert::cargo_binary("jcsh")
            .current_dir(temp_dir.path())
            .with_args(&[log_arg.as_str(), unicode_file_path])
            .stdout()
            .is(expected_data.stdout)
            .exit_status_is(expected_data.exit_status)
            .unwrap();
    }
}

#[test]
fn test_command_string() {
    Assert::cargo_binary("jcsh")
        .with_args(&["-c", "echo one; echo two | cat"])
        .stdout()
        .is("one\ntwo\n")
        .unwrap();
}

#[test]
fn test_version() {
    Assert::cargo_binary("jcsh")
        .with_args(&["--version"])
        .stdout()
        .contains("jcsh version")
        .unwrap();
}

fn get_path_to_test_scripts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("scripts")
}

/// Does filename start with 'simple' and end with '.jcsh'?
fn is_simple_jcsh_script(entry: &DirEntry) -> bool {
    let filename = entry.file_name();
    let unicode_filename = filename.to_str().expect("filename should be valid Unicode");
    unicode_filename.starts_with("simple") && unicode_filename.ends_with(".jcsh")
}

fn generate_temp_directory() -> io::Result<TempDir> {
    // Because of limitation in `assert_cli`, temporary directory must be
    // subdirectory of directory containing Cargo.toml
    let temp_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests");
    TempDir::new_in(temp_root, "temp")
}
