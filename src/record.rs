//! A JSON-lines record of one driver run.

use json::JsonValue;
use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const ENV_PREFIXES: [&str; 2] = ["GTM", "RUST_LOG"];

pub struct RunRecord {
    pub name: String,
    executable: PathBuf,
    parameters: Vec<String>,
    run_date: String,
    output: HashMap<String, String>,
    environment_vars: HashMap<String, String>,
}

impl RunRecord {
    pub fn new() -> Self {
        let executable = env::current_exe().unwrap_or(PathBuf::from("__unknown__"));
        let name = executable
            .file_stem()
            .unwrap_or(OsStr::new("__unknown__"))
            .to_string_lossy()
            .to_string();
        RunRecord {
            name,
            executable,
            parameters: env::args().skip(1).collect(),
            run_date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            output: HashMap::new(),
            environment_vars: env::vars()
                .filter(|(key, _)| ENV_PREFIXES.iter().any(|p| key.starts_with(p)))
                .collect(),
        }
    }

    pub fn with_output(&mut self, key: &str, value: String) {
        self.output.insert(key.to_string(), value);
    }

    pub fn as_json(&self) -> JsonValue {
        json::object! {
            "name" => self.name.clone(),
            "executable" => self.executable.to_string_lossy().to_string(),
            "parameters" => self.parameters.clone(),
            "run_date" => self.run_date.clone(),
            "output" => self.output.clone(),
            "environment" => self.environment_vars.clone(),
        }
    }

    /// Print to stdout, pretty with `indent` or on one line.
    pub fn display(&self, indent: Option<u16>) {
        let json_obj = self.as_json();
        match indent {
            None => println!("{}", json::stringify(json_obj)),
            Some(indent) => println!("{}", json::stringify_pretty(json_obj, indent)),
        }
    }

    /// Append one line to `file`, creating it and its parent directories as needed.
    pub fn write(&self, file: &Path) -> std::io::Result<()> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(file)?;
        writeln!(f, "{}", json::stringify(self.as_json()))
    }

    pub fn default_output_path(&self, root: &Path) -> PathBuf {
        let time = chrono::Local::now().format("%Y%m%d_%H%M%S");
        root.join(format!("{}_{time}_result.jsonl", self.name))
    }
}
