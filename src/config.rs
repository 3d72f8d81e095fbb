//! 配置模块，负责保存和加载 JSON 格式的搜索设置

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::Match;
use crate::error::ParseError;
use crate::parser::SearchFlags;
use crate::registry::MatchRegistry;

/// 配置文件读写错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {}", .0.display())]
    NotFound(PathBuf),
    #[error("无法读写配置文件 {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("无法解析JSON配置文件 {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 从 JSON 文件读取任意可反序列化的结构
pub fn read_json_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// 一条搜索设置：查询文本加上两个开关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSetting {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub regex_search: bool,
}

impl SearchSetting {
    pub fn new(text: impl Into<String>, flags: SearchFlags) -> Self {
        Self {
            text: text.into(),
            case_sensitive: flags.case_sensitive,
            regex_search: flags.regex_search,
        }
    }

    pub fn flags(&self) -> SearchFlags {
        SearchFlags::new(self.case_sensitive, self.regex_search)
    }

    /// 用给定的注册表重新编译查询文本
    pub fn compile(&self, registry: &MatchRegistry) -> Result<Match, ParseError> {
        registry.compile(&self.text, self.flags())
    }
}

/// 已保存的搜索列表，最近使用的排在最前
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearches {
    #[serde(default)]
    pub searches: Vec<SearchSetting>,
}

impl SavedSearches {
    /// 从JSON文件加载已保存的搜索
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json_file(path)
    }

    /// 写回JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 记录一条搜索；相同的设置只保留一份并移到最前
    pub fn remember(&mut self, setting: SearchSetting) {
        self.searches.retain(|existing| *existing != setting);
        self.searches.insert(0, setting);
    }

    pub fn len(&self) -> usize {
        self.searches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchSetting> {
        self.searches.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    #[test]
    fn test_load_valid_json_config() {
        // 创建临时配置文件
        let temp_file = "test_saved_searches.json";
        let mut file = fs::File::create(temp_file).unwrap();
        writeln!(
            file,
            r#"{{
            "searches": [
                {{ "text": "type:way highway=*", "case_sensitive": false }},
                {{ "text": "name~^A", "regex_search": true }}
            ]
        }}"#
        )
        .unwrap();

        let saved = SavedSearches::from_json_file(temp_file).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved.searches[0].text, "type:way highway=*");
        assert!(!saved.searches[0].regex_search);
        assert!(saved.searches[1].regex_search);

        // 清理
        fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_invalid_json_config() {
        let temp_file = "test_invalid_searches.json";
        let mut file = fs::File::create(temp_file).unwrap();
        writeln!(file, "invalid json").unwrap();

        let result = SavedSearches::from_json_file(temp_file);
        assert!(matches!(result, Err(ConfigError::Json { .. })));

        fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_missing_file() {
        let result = SavedSearches::from_json_file("non_existent_searches.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_file = "test_saved_roundtrip.json";
        let mut saved = SavedSearches::default();
        saved.remember(SearchSetting::new("building", SearchFlags::default()));
        saved.remember(SearchSetting::new("name:Main", SearchFlags::new(true, false)));
        saved.save(temp_file).unwrap();

        let reloaded = SavedSearches::from_json_file(temp_file).unwrap();
        assert_eq!(reloaded, saved);
        assert_eq!(reloaded.searches[0].text, "name:Main");

        fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_remember_moves_to_front() {
        let mut saved = SavedSearches::default();
        saved.remember(SearchSetting::new("a", SearchFlags::default()));
        saved.remember(SearchSetting::new("b", SearchFlags::default()));
        saved.remember(SearchSetting::new("a", SearchFlags::default()));

        let texts: Vec<&str> = saved.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_setting_compiles() {
        let registry = MatchRegistry::default();
        let setting = SearchSetting::new("type:node", SearchFlags::default());
        assert_eq!(setting.compile(&registry).unwrap().to_string(), "type=node");

        let broken = SearchSetting::new("foo~[", SearchFlags::new(false, true));
        assert!(broken.compile(&registry).is_err());
    }
}
