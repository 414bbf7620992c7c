//! 로컬 해시 체인 원장
//!
//! 한 줄에 한 레코드인 JSONL 파일입니다. 각 레코드는 직전 레코드의 해시를
//! `prev_hash`로 가지므로, 중간 레코드를 고치면 [`FileLedger::verify_chain`]이
//! 그 지점을 찾아냅니다. 같은 페이로드 해시를 다시 제출하면 기존 참조를 반환합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{LedgerClient, LedgerPayload, LedgerRecord, LedgerRecordStatus, LedgerRef};
use crate::error::LedgerError;

/// 첫 레코드의 prev_hash
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// 원장 파일의 한 줄
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainRecord {
    seq: u64,
    ledger_ref: String,
    recorded_at: i64,
    content_hash: String,
    payload: LedgerPayload,
    prev_hash: String,
    hash: String,
}

fn chain_hash(seq: u64, prev_hash: &str, content_hash: &str) -> String {
    hex::encode(Sha256::digest(format!("{seq}:{prev_hash}:{content_hash}")))
}

fn ledger_ref_for(seq: u64) -> String {
    format!("fl-{seq:08}")
}

fn io_unavailable(path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::Unavailable(format!("{}: {e}", path.display()))
}

#[derive(Debug)]
struct ChainState {
    seq: u64,
    last_hash: String,
    by_content: HashMap<String, LedgerRef>,
    by_ref: HashMap<String, String>,
}

impl ChainState {
    fn empty() -> Self {
        Self {
            seq: 0,
            last_hash: GENESIS_HASH.to_owned(),
            by_content: HashMap::new(),
            by_ref: HashMap::new(),
        }
    }

    fn push(&mut self, record: &ChainRecord) {
        self.seq = record.seq;
        self.last_hash = record.hash.clone();
        self.by_content.insert(
            record.content_hash.clone(),
            LedgerRef(record.ledger_ref.clone()),
        );
        self.by_ref
            .insert(record.ledger_ref.clone(), record.content_hash.clone());
    }
}

/// 해시 체인 검증 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    /// 검사한 레코드 수
    pub records: u64,
    /// 처음으로 체인이 깨진 줄 번호 (1부터)
    pub first_broken: Option<u64>,
    /// 깨진 사유
    pub reason: Option<String>,
}

impl ChainVerification {
    /// 체인이 온전한지 확인합니다.
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

/// 로컬 해시 체인 원장
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    state: Mutex<ChainState>,
}

impl FileLedger {
    /// 원장 파일을 열고 인덱스를 재구성합니다. 파일이 없으면 첫 제출 때 생성됩니다.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_unavailable(parent, e))?;
        }

        let mut state = ChainState::empty();
        for (index, line) in read_lines(path).await?.iter().enumerate() {
            let record: ChainRecord = serde_json::from_str(line).map_err(|e| {
                LedgerError::Unavailable(format!(
                    "{}: unreadable record on line {}: {e}",
                    path.display(),
                    index + 1
                ))
            })?;
            state.push(&record);
        }

        info!(
            path = %path.display(),
            records = state.seq,
            "file ledger opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// 원장 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 기록된 레코드 수
    pub async fn len(&self) -> u64 {
        self.state.lock().await.seq
    }

    /// 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 파일 전체를 다시 읽어 해시 체인을 검증합니다.
    pub async fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        // 검증 중 추가 쓰기를 막음
        let _state = self.state.lock().await;
        let lines = read_lines(&self.path).await?;

        let mut prev_hash = GENESIS_HASH.to_owned();
        for (index, line) in lines.iter().enumerate() {
            let line_no = index as u64 + 1;
            let broken = |reason: String| ChainVerification {
                records: lines.len() as u64,
                first_broken: Some(line_no),
                reason: Some(reason),
            };

            let record: ChainRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => return Ok(broken(format!("unreadable record: {e}"))),
            };
            if record.seq != line_no {
                return Ok(broken(format!("sequence {} out of place", record.seq)));
            }
            if record.prev_hash != prev_hash {
                return Ok(broken("prev_hash does not match previous record".to_owned()));
            }
            if record.payload.content_hash()? != record.content_hash {
                return Ok(broken("payload does not match content_hash".to_owned()));
            }
            if chain_hash(record.seq, &record.prev_hash, &record.content_hash) != record.hash {
                return Ok(broken("record hash mismatch".to_owned()));
            }
            prev_hash = record.hash;
        }

        Ok(ChainVerification {
            records: lines.len() as u64,
            first_broken: None,
            reason: None,
        })
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>, LedgerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(io_unavailable(path, e)),
    }
}

impl LedgerClient for FileLedger {
    async fn submit(&self, payload: &LedgerPayload) -> Result<LedgerRef, LedgerError> {
        let content_hash = payload.content_hash()?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state.by_content.get(&content_hash) {
            debug!(
                ledger_ref = %existing,
                incident_id = %payload.incident_id,
                "payload already recorded, returning existing ref"
            );
            return Ok(existing.clone());
        }

        let seq = state.seq + 1;
        let record = ChainRecord {
            seq,
            ledger_ref: ledger_ref_for(seq),
            recorded_at: Utc::now().timestamp(),
            hash: chain_hash(seq, &state.last_hash, &content_hash),
            prev_hash: state.last_hash.clone(),
            content_hash,
            payload: payload.clone(),
        };

        let mut line = serde_json::to_vec(&record)
            .map_err(|e| LedgerError::Rejected(format!("record serialization failed: {e}")))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_unavailable(&self.path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| io_unavailable(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| io_unavailable(&self.path, e))?;

        state.push(&record);
        debug!(
            ledger_ref = %record.ledger_ref,
            incident_id = %payload.incident_id,
            "ledger record appended"
        );
        Ok(LedgerRef(record.ledger_ref))
    }

    async fn query(&self, ledger_ref: &LedgerRef) -> Result<LedgerRecord, LedgerError> {
        let state = self.state.lock().await;
        let content_hash = state
            .by_ref
            .get(ledger_ref.as_str())
            .ok_or_else(|| LedgerError::NotFound(ledger_ref.to_string()))?;
        Ok(LedgerRecord {
            ledger_ref: ledger_ref.clone(),
            status: LedgerRecordStatus::Final,
            content_hash: Some(content_hash.clone()),
        })
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
