/*
 *  Copyright 2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::fs;

use fornax::workers::overseer::DumpStore;
use fornax::FailedEnvelope;
use tempfile::tempdir;

#[test]
fn validation_round_trips_a_sentinel_and_cleans_up() {
    let dir = tempdir().unwrap();
    let store = DumpStore::new(dir.path());

    store.validate().unwrap();
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn dumped_bodies_survive_byte_for_byte() {
    let dir = tempdir().unwrap();
    let store = DumpStore::new(dir.path());

    // a dump file holds the raw failed-envelope body, so replaying it
    // through resubmission decodes to the very same envelope
    let envelope = FailedEnvelope {
        service: "watcher".to_string(),
        queue: "pending".to_string(),
        error: "task vanished".to_string(),
        desc: "Couldn't get the sandbox status of the task!".to_string(),
        msg: r#"{"TaskId":3,"CuckooURL":"http://sb:8090","CritsData":{"analysis_id":"x"}}"#
            .to_string(),
    };
    let body = serde_json::to_vec(&envelope).unwrap();

    let path = store.write(&body).await.unwrap();
    assert_eq!(fs::read(&path).unwrap(), body);

    let replayed: FailedEnvelope = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(replayed, envelope);
}

#[tokio::test]
async fn collect_lists_only_regular_files() {
    let dir = tempdir().unwrap();
    let store = DumpStore::new(dir.path());

    store.write(b"one").await.unwrap();
    fs::create_dir(dir.path().join("subdir")).unwrap();

    let files = store.collect().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(fs::read(&files[0]).unwrap(), b"one");
}
