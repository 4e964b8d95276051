// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Registry persistence and recovery tests
use channel_recorder::{ChannelRegistry, ChannelStatus, RecorderError};
use tempfile::TempDir;

#[tokio::test]
async fn test_missing_file_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    let registry = ChannelRegistry::open(temp_dir.path().join("channels.json"), 0).await;

    assert!(registry.list().await.is_empty());
    assert!(!registry.is_degraded());
}

#[tokio::test]
async fn test_reopen_recovers_records() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("channels.json");

    {
        let registry = ChannelRegistry::open(&path, 0).await;
        registry.add("alice").await.unwrap();
        registry.add("bob").await.unwrap();
        registry.add("carol").await.unwrap();

        registry
            .update("alice", |c| {
                c.status = ChannelStatus::Recording;
                c.segment_index = 4;
                c.current_recording_path = Some(temp_dir.path().join("alice_4.ts"));
                c.session_id = Some("session-a".to_string());
            })
            .await
            .unwrap();
        registry
            .update("bob", |c| {
                c.status = ChannelStatus::Paused;
                c.paused = true;
            })
            .await
            .unwrap();
        registry
            .update("carol", |c| c.status = ChannelStatus::Online)
            .await
            .unwrap();
    }

    let registry = ChannelRegistry::open(&path, 0).await;
    let channels = registry.list().await;
    let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);

    // Nothing captures across a restart
    let alice = registry.get("alice").await.unwrap();
    assert_eq!(alice.status, ChannelStatus::Idle);
    assert!(alice.current_recording_path.is_none());
    assert_eq!(alice.segment_index, 4);
    assert_eq!(alice.session_id.as_deref(), Some("session-a"));

    let bob = registry.get("bob").await.unwrap();
    assert_eq!(bob.status, ChannelStatus::Paused);
    assert!(bob.paused);

    assert_eq!(registry.get("carol").await.unwrap().status, ChannelStatus::Idle);
}

#[tokio::test]
async fn test_corrupt_file_is_set_aside() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("channels.json");
    std::fs::write(&path, b"{ this is not json").unwrap();

    let registry = ChannelRegistry::open(&path, 0).await;
    assert!(registry.list().await.is_empty());

    let aside = temp_dir.path().join("channels.corrupt");
    assert_eq!(std::fs::read(&aside).unwrap(), b"{ this is not json");

    // Still usable afterwards
    registry.add("alice").await.unwrap();
    let reopened = ChannelRegistry::open(&path, 0).await;
    assert_eq!(reopened.list().await.len(), 1);
}

#[tokio::test]
async fn test_persisted_document_is_readable_json() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("channels.json");
    let registry = ChannelRegistry::open(&path, 0).await;
    registry.add("  Alice ").await.unwrap();

    let document: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(document["version"], 1);
    assert_eq!(document["channels"][0]["name"], "alice");
    assert_eq!(document["channels"][0]["status"], "idle");

    // No temp files left behind
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "channels.json")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let registry = ChannelRegistry::open(temp_dir.path().join("channels.json"), 0).await;

    for name in ["", "   ", "../etc", "a/b", "with space"] {
        assert!(
            matches!(registry.add(name).await, Err(RecorderError::InvalidChannelName(_))),
            "accepted {:?}",
            name
        );
    }
    assert!(registry.list().await.is_empty());
}
