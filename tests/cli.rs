use std::process::Command;

const DB_ENV: [&str; 6] = [
    "DATABASE_URL",
    "SUPABASE_HOST",
    "SUPABASE_PORT",
    "SUPABASE_DB",
    "SUPABASE_USER",
    "SUPABASE_PASSWORD",
];

fn shpload() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shpload"));
    for var in DB_ENV {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = shpload().arg("--help").output().expect("failed to execute process");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["ingest", "upload", "tables", "inspect"] {
        assert!(stdout.contains(command), "{stdout}");
    }
}

#[test]
fn missing_host_is_reported_before_connecting() {
    let output = shpload().arg("tables").output().expect("failed to execute process");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SUPABASE_HOST"), "{stderr}");
}

#[test]
fn host_with_scheme_is_rejected() {
    let output = shpload()
        .args(["tables", "--host", "postgres://db.example.supabase.co", "--password", "x"])
        .output()
        .expect("failed to execute process");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not a URL"), "{stderr}");
}

#[test]
fn unknown_if_exists_mode_is_a_usage_error() {
    let output = shpload()
        .args(["ingest", "data", "--if-exists", "merge"])
        .output()
        .expect("failed to execute process");
    assert_eq!(output.status.code(), Some(2));
}
