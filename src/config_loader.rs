use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::vulkan::window_settings::PresentMode;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub scene_path: String,
    pub present_mode: PresentMode,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scene_path: "assets/scenes/cornell_box.obj".to_string(),
            present_mode: PresentMode::Fifo,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl Config {
    pub fn from_str(value: &str) -> Self {
        serde_json::from_str(value).expect("Could not parse config file")
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    pub fn load_config(&mut self) -> &Config {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content),
            Err(_) => {
                // First run: write the defaults next to the binary so they
                // can be edited.
                let config = Config::default();
                self.config = Some(config.clone());
                self.save_config();
                config
            }
        };
        self.config = Some(config);
        self.config.as_ref().unwrap()
    }

    pub fn save_config(&self) {
        if let Some(config) = &self.config {
            let content =
                serde_json::to_string_pretty(config).expect("Could not serialize config");
            std::fs::write(&self.path, content).expect("Could not write config file");
        }
    }
}
