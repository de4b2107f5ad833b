//! 테이블 필터
//!
//! 각 패턴은 `schema.table` 문자열에 대해 앵커 없이 검사된다.
//! 패턴이 없으면 모든 테이블이 통과한다.

use crate::error::{BridgeError, Result};
use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    patterns: Vec<Regex>,
}

impl TableFilter {
    /// 패턴 컴파일. 잘못된 패턴은 엔진 시작 실패로 취급
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    BridgeError::EngineStartError(format!(
                        "invalid table regex {:?}: {}",
                        p.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TableFilter { patterns })
    }

    pub fn matches(&self, schema: &str, table: &str) -> bool {
        self.matches_key(&format!("{}.{}", schema, table))
    }

    pub fn matches_key(&self, key: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(key))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
