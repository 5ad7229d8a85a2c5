//! 圖配置模型

use serde::{Deserialize, Serialize};

use crate::{QuibError, Result};

/// 依賴圖配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// 巢狀讀取的最大深度（防止循環依賴造成無限遞迴）
    pub recursion_limit: usize,

    /// 函數節點預設是否允許覆寫
    /// - false: 只有來源節點可被直接覆寫，指派會向上反推（預設）
    /// - true: 函數節點本身也是候選覆寫點
    pub allow_overriding_functions: bool,

    /// 新節點的預設緩存模式
    pub default_cache_mode: CacheMode,

    /// 是否記住歧義指派的選擇
    pub cache_choices: bool,

    /// 是否收集需要重繪的圖形節點
    pub track_redraws: bool,
}

impl GraphConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self {
            recursion_limit: 256,
            allow_overriding_functions: false,
            default_cache_mode: CacheMode::On,
            cache_choices: true,
            track_redraws: true,
        }
    }

    /// 從 JSON 文件載入配置（缺少的欄位使用預設值）
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 建構器模式：設置遞迴上限
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// 建構器模式：設置函數節點是否允許覆寫
    pub fn with_allow_overriding_functions(mut self, allow: bool) -> Self {
        self.allow_overriding_functions = allow;
        self
    }

    /// 建構器模式：設置預設緩存模式
    pub fn with_default_cache_mode(mut self, mode: CacheMode) -> Self {
        self.default_cache_mode = mode;
        self
    }

    /// 建構器模式：設置是否記住覆寫選擇
    pub fn with_cache_choices(mut self, enabled: bool) -> Self {
        self.cache_choices = enabled;
        self
    }

    /// 建構器模式：設置是否收集重繪節點
    pub fn with_track_redraws(mut self, enabled: bool) -> Self {
        self.track_redraws = enabled;
        self
    }

    /// 檢查配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(QuibError::Config("recursion_limit 必須大於 0".to_string()));
        }
        Ok(())
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 緩存模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// 緩存計算結果，只重算失效的子路徑
    On,
    /// 不緩存，每次讀取都重新計算
    Off,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.recursion_limit, 256);
        assert!(!config.allow_overriding_functions);
        assert_eq!(config.default_cache_mode, CacheMode::On);
        assert!(config.cache_choices);
    }

    #[test]
    fn test_config_builder() {
        let config = GraphConfig::new()
            .with_recursion_limit(16)
            .with_allow_overriding_functions(true)
            .with_default_cache_mode(CacheMode::Off)
            .with_cache_choices(false)
            .with_track_redraws(false);

        assert_eq!(config.recursion_limit, 16);
        assert!(config.allow_overriding_functions);
        assert_eq!(config.default_cache_mode, CacheMode::Off);
        assert!(!config.cache_choices);
        assert!(!config.track_redraws);
    }

    #[test]
    fn test_config_from_json() {
        let config = GraphConfig::from_json(r#"{ "recursion_limit": 32, "default_cache_mode": "Off" }"#).unwrap();
        assert_eq!(config.recursion_limit, 32);
        assert_eq!(config.default_cache_mode, CacheMode::Off);
        // 未指定的欄位使用預設值
        assert!(config.cache_choices);

        assert!(GraphConfig::from_json(r#"{ "recursion_limit": 0 }"#).is_err());
    }
}
