//! Shared fixtures for bandmap-core integration tests

#![allow(dead_code)]

use bandmap::{
    BackendError, BackingProvider, ExtentTable, MapFlags, MappingPublisher, ResourceHandle,
    Termination,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a sparse bundle with the given header values and `(relative path, size)` band files
pub fn write_bundle(band_size: u64, total_size: u64, bands: &[(&str, usize)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    let header = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleInfoDictionaryVersion</key>
	<string>6.0</string>
	<key>band-size</key>
	<integer>{}</integer>
	<key>bundle-backingstore-version</key>
	<integer>1</integer>
	<key>diskimage-bundle-type</key>
	<string>com.apple.diskimage.sparsebundle</string>
	<key>size</key>
	<integer>{}</integer>
</dict>
</plist>
"#,
        band_size, total_size
    );
    fs::write(root.join("Info.plist"), header).unwrap();

    let bands_dir = root.join("bands");
    fs::create_dir_all(&bands_dir).unwrap();
    for (name, size) in bands {
        let path = bands_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![0xa5u8; *size]).unwrap();
    }

    temp
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeHandle(pub String);

impl ResourceHandle for FakeHandle {
    fn locator(&self) -> &str {
        &self.0
    }
}

/// Loop-device stand-in with scripted failures
///
/// Locators are `/dev/loop<ordinal>` so tests can predict them.
#[derive(Debug, Default)]
pub struct FakeProvider {
    /// Band ordinals whose attach fails
    pub refuse_attach: HashSet<u64>,
    /// Locator -> number of detach calls that fail before one succeeds
    pub detach_failures: HashMap<String, u32>,
    pub attached: Vec<String>,
    pub detach_calls: Vec<String>,
    pub detached: Vec<String>,
    pub read_only_seen: Vec<bool>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(mut self, id: u64) -> Self {
        self.refuse_attach.insert(id);
        self
    }

    pub fn failing_detach(mut self, locator: &str, times: u32) -> Self {
        self.detach_failures.insert(locator.to_string(), times);
        self
    }
}

fn ordinal(path: &Path) -> u64 {
    let name = path.file_name().unwrap().to_str().unwrap();
    u64::from_str_radix(name, 16).unwrap()
}

impl BackingProvider for FakeProvider {
    type Handle = FakeHandle;

    fn attach(&mut self, path: &Path, read_only: bool) -> Result<FakeHandle, BackendError> {
        let id = ordinal(path);
        self.read_only_seen.push(read_only);
        if self.refuse_attach.contains(&id) {
            return Err(BackendError::rejected(
                "attach",
                path.display().to_string(),
                "no free loop device",
            ));
        }
        let locator = format!("/dev/loop{}", id);
        self.attached.push(locator.clone());
        Ok(FakeHandle(locator))
    }

    fn detach(&mut self, handle: &FakeHandle) -> Result<(), BackendError> {
        self.detach_calls.push(handle.0.clone());
        if let Some(remaining) = self.detach_failures.get_mut(&handle.0) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::rejected("detach", handle.0.clone(), "device busy"));
            }
        }
        self.detached.push(handle.0.clone());
        Ok(())
    }
}

/// Device-mapper stand-in with scripted failures
#[derive(Debug, Default)]
pub struct FakePublisher {
    pub fail_create: bool,
    /// Number of remove calls that fail before one succeeds
    pub remove_failures: u32,
    pub created: Option<(String, MapFlags, ExtentTable)>,
    pub remove_calls: u32,
    pub live: bool,
}

impl MappingPublisher for FakePublisher {
    fn create(
        &mut self,
        name: &str,
        _unique_id: &str,
        flags: MapFlags,
        table: &ExtentTable,
    ) -> Result<(), BackendError> {
        if self.fail_create {
            return Err(BackendError::rejected("create", name, "device or resource busy"));
        }
        self.created = Some((name.to_string(), flags, table.clone()));
        self.live = true;
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        self.remove_calls += 1;
        if self.remove_failures > 0 {
            self.remove_failures -= 1;
            return Err(BackendError::rejected("remove", name, "device busy"));
        }
        self.live = false;
        Ok(())
    }
}

/// Termination source driven by a script
///
/// `poll` answers from `polls` (then `false`); `wait` returns immediately
/// and is counted.
#[derive(Debug, Default)]
pub struct ScriptedTermination {
    pub polls: VecDeque<bool>,
    pub poll_count: usize,
    pub waits: usize,
    /// `"poll"` / `"wait"` in call order
    pub calls: Vec<&'static str>,
}

impl ScriptedTermination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination on the `n`th poll (1-based)
    pub fn cancel_on_poll(n: usize) -> Self {
        let mut polls = VecDeque::new();
        for _ in 1..n {
            polls.push_back(false);
        }
        polls.push_back(true);
        Self {
            polls,
            ..Self::default()
        }
    }
}

impl Termination for ScriptedTermination {
    fn poll(&mut self) -> bool {
        self.poll_count += 1;
        self.calls.push("poll");
        self.polls.pop_front().unwrap_or(false)
    }

    fn wait(&mut self) {
        self.waits += 1;
        self.calls.push("wait");
    }
}

pub fn band_path(id: u64) -> PathBuf {
    PathBuf::from(format!("bands/{:x}", id))
}
