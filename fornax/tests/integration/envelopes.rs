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

//! Wire-contract checks across the message types: what one stage encodes,
//! the next stage (and the overseer) must decode.

use fornax::{GenericEnvelope, ReadyTask, RepositoryContext, SubmissionRequest, TaskHandle};

fn context() -> RepositoryContext {
    RepositoryContext {
        crits_url: "https://repo.lab".to_string(),
        analysis_id: "aa01".to_string(),
        object_type: "Sample".to_string(),
        object_id: "9".to_string(),
        username: "svc".to_string(),
        api_key: "k".to_string(),
        md5: "00".to_string(),
        source: "lab".to_string(),
    }
}

#[test]
fn feeder_output_is_watcher_input() {
    let handle = TaskHandle {
        task_id: 12,
        cuckoo_url: "http://sb:8090".to_string(),
        crits_data: Some(context()),
    };

    let body = serde_json::to_vec(&handle).unwrap();
    let received: TaskHandle = serde_json::from_slice(&body).unwrap();
    received.validate().unwrap();
    assert_eq!(received.task_id, 12);
}

#[test]
fn watcher_output_is_reporter_input() {
    let ready: ReadyTask = TaskHandle {
        task_id: 12,
        cuckoo_url: "http://sb:8090".to_string(),
        crits_data: Some(context()),
    };

    let body = serde_json::to_vec(&ready).unwrap();
    let received: ReadyTask = serde_json::from_slice(&body).unwrap();
    received.validate().unwrap();
}

#[test]
fn overseer_extracts_context_from_either_stage_body() {
    // a submit-stage body uses snake_case for the context
    let submit = serde_json::to_string(&SubmissionRequest {
        payload: Default::default(),
        file: Some(fornax::SamplePayload {
            name: "a.exe".to_string(),
            data: "QQ==".to_string(),
        }),
        crits_data: Some(context()),
    })
    .unwrap();
    let generic: GenericEnvelope = serde_json::from_str(&submit).unwrap();
    assert_eq!(generic.crits_data.unwrap().analysis_id, "aa01");

    // a pending/ready-stage body uses the PascalCase field
    let pending = serde_json::to_string(&TaskHandle {
        task_id: 3,
        cuckoo_url: "http://sb:8090".to_string(),
        crits_data: Some(context()),
    })
    .unwrap();
    let generic: GenericEnvelope = serde_json::from_str(&pending).unwrap();
    assert_eq!(generic.crits_data.unwrap().analysis_id, "aa01");
}
