//! Configuration Writer
//!
//! Applies a [`WritePlan`] under one authenticated session, in the order
//! ChangeFileSettings, WriteData, ChangeKey. Every command is built before the
//! first one is sent, so a bad plan never reaches the tag.

use ntagkit_apdu_core::CardTransport;
use tracing::{debug, info, instrument, warn};

use crate::commands::{NativeCommand, change_file_settings, change_key, write_data};
use crate::config::WritePlan;
use crate::error::{Error, FormatError, WriteError};
use crate::keys::{KeyNo, KeyStore};
use crate::secure_messaging::SecureLink;

/// One acknowledged unit of a write sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum WriteStep {
    /// ChangeFileSettings
    #[display("ChangeFileSettings(file {file_no})")]
    ChangeFileSettings {
        /// Target file
        file_no: u8,
    },
    /// One WriteData chunk
    #[display("WriteData(offset {offset}, {len} bytes)")]
    WriteData {
        /// File offset
        offset: u32,
        /// Chunk length
        len: usize,
    },
    /// ChangeKey
    #[display("ChangeKey({_0})")]
    ChangeKey(KeyNo),
}

/// Successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Steps in the order the tag acknowledged them
    pub steps: Vec<WriteStep>,
    /// Command counter after the last step
    pub final_counter: u16,
    /// The authenticated key was changed and the tag closed the session
    pub session_ended: bool,
}

struct Planned {
    step: WriteStep,
    command: NativeCommand,
    closing: bool,
}

fn build(plan: &WritePlan, store: &KeyStore, slot: KeyNo) -> Result<Vec<Planned>, FormatError> {
    let mut steps = vec![Planned {
        step: WriteStep::ChangeFileSettings { file_no: plan.file_no },
        command: change_file_settings(plan.file_no, &plan.settings)?,
        closing: false,
    }];

    if let Some(ndef) = &plan.ndef {
        let mode = plan
            .settings
            .write_comm_mode(Some(slot))
            .ok_or(FormatError::WriteDenied(slot))?;
        for chunk in write_data(plan.file_no, 0, ndef.bytes(), mode)? {
            steps.push(Planned {
                step: WriteStep::WriteData {
                    offset: chunk.offset,
                    len: chunk.command.data().len(),
                },
                command: chunk.command,
                closing: false,
            });
        }
    }

    // The authenticated slot goes last, the tag ends the session once it changes
    let (own, others): (Vec<_>, Vec<_>) =
        plan.key_changes.iter().partition(|change| change.no == slot);
    for change in others.into_iter().chain(own) {
        let old = store.key(change.no);
        if old == change.key {
            debug!(key = change.no.value(), "key unchanged, skipping");
            continue;
        }
        let version = store.version(change.no).wrapping_add(1);
        let closing = change.no == slot;
        let command = if closing {
            change_key(change.no, &change.key, version, None)
        } else {
            change_key(change.no, &change.key, version, Some(&old))
        };
        steps.push(Planned {
            step: WriteStep::ChangeKey(change.no),
            command,
            closing,
        });
    }
    Ok(steps)
}

/// Run `plan` over an authenticated link
///
/// A failure on the first step surfaces unchanged; the tag has not accepted
/// anything yet. After that every failure is [`WriteError::PartialApply`].
#[instrument(skip_all, fields(file = plan.file_no))]
pub(crate) async fn write<T: CardTransport>(
    link: &mut SecureLink<'_, T>,
    store: &KeyStore,
    plan: &WritePlan,
) -> crate::Result<Ack> {
    let steps = build(plan, store, link.session().slot())?;
    let mut completed = Vec::with_capacity(steps.len());
    let mut session_ended = false;

    for planned in steps {
        let before = link.session().counter();
        let result = if planned.closing {
            link.exchange_closing(&planned.command).await
        } else {
            link.exchange(&planned.command).await.map(drop)
        };
        let result = result.and_then(|()| {
            if link.session().counter() == before.wrapping_add(1) {
                Ok(())
            } else {
                Err(Error::Protocol("command counter did not advance by one"))
            }
        });

        if let Err(source) = result {
            if completed.is_empty() {
                warn!(step = %planned.step, error = %source, "write rejected");
                return Err(source);
            }
            warn!(
                step = %planned.step,
                completed = completed.len(),
                error = %source,
                "write interrupted"
            );
            return Err(WriteError::PartialApply {
                completed,
                failed: planned.step,
                source: Box::new(source),
            }
            .into());
        }

        debug!(step = %planned.step, counter = link.session().counter(), "step acknowledged");
        completed.push(planned.step);
        session_ended |= planned.closing;
    }

    info!(steps = completed.len(), "configuration written");
    Ok(Ack {
        steps: completed,
        final_counter: link.session().counter(),
        session_ended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authenticate;
    use crate::config::Ntag424Config;
    use crate::constants::NDEF_FILE_NO;
    use crate::keys::AesKey;
    use crate::ndef::NdefImage;
    use crate::simulator::SimulatedTag;
    use ntagkit_apdu_core::CardExecutor;

    const SUN_KEY: &str = "00112233445566778899AABBCCDDEEFF";

    fn sun_plan() -> WritePlan {
        Ntag424Config {
            sun_enabled: true,
            sun_key: SUN_KEY.into(),
            ..Default::default()
        }
        .plan()
        .unwrap()
    }

    async fn connected(tag: &SimulatedTag) -> CardExecutor<crate::simulator::SimulatorTransport> {
        let mut executor = CardExecutor::new(tag.transport());
        executor.connect().await.unwrap();
        executor
    }

    #[tokio::test]
    async fn test_sun_write_applies_everything() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        let plan = sun_plan();

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        let ack = write(&mut link, &KeyStore::new(), &plan).await.unwrap();

        assert_eq!(
            ack.steps,
            vec![
                WriteStep::ChangeFileSettings { file_no: NDEF_FILE_NO },
                WriteStep::WriteData { offset: 0, len: plan.ndef.as_ref().unwrap().len() },
                WriteStep::ChangeKey(KeyNo::SDM_FILE_READ),
            ]
        );
        assert_eq!(ack.final_counter, 3);
        assert!(!ack.session_ended);

        assert_eq!(tag.file_settings(NDEF_FILE_NO), Some(plan.settings.clone()));
        let file = tag.file_data(NDEF_FILE_NO);
        assert_eq!(
            NdefImage::parse_uri(&file).unwrap(),
            format!("https://example.com/verify?sun={}", "0".repeat(36))
        );
        assert_eq!(tag.key(KeyNo::SDM_FILE_READ), AesKey::from_hex(SUN_KEY).unwrap());
        assert_eq!(tag.key_version(KeyNo::SDM_FILE_READ), 1);
    }

    #[tokio::test]
    async fn test_drop_after_first_step_is_partial_apply() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        tag.drop_after(1);

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        match write(&mut link, &KeyStore::new(), &sun_plan()).await.unwrap_err() {
            Error::Write(WriteError::PartialApply { completed, failed, source }) => {
                assert_eq!(
                    completed,
                    vec![WriteStep::ChangeFileSettings { file_no: NDEF_FILE_NO }]
                );
                assert!(matches!(failed, WriteStep::WriteData { offset: 0, .. }));
                assert!(source.is_channel_failure());
            }
            other => panic!("expected PartialApply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_step_failure_surfaces_directly() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        tag.drop_after(0);

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        let err = write(&mut link, &KeyStore::new(), &sun_plan()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_counter_skew_is_partial_apply() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        // From the second command on the tag MACs with a counter the reader never used
        tag.skew_counter_after(1, 1);

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        match write(&mut link, &KeyStore::new(), &sun_plan()).await.unwrap_err() {
            Error::Write(WriteError::PartialApply { completed, source, .. }) => {
                assert_eq!(completed.len(), 1);
                assert!(matches!(*source, Error::Integrity(_)));
            }
            other => panic!("expected PartialApply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_key_is_skipped() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        let mut store = KeyStore::new();
        store.load(KeyNo::SDM_FILE_READ, AesKey::from_hex(SUN_KEY).unwrap(), 4);

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        let ack = write(&mut link, &store, &sun_plan()).await.unwrap();
        assert!(!ack.steps.contains(&WriteStep::ChangeKey(KeyNo::SDM_FILE_READ)));
        assert_eq!(tag.key(KeyNo::SDM_FILE_READ), AesKey::zero());
    }

    #[tokio::test]
    async fn test_changing_the_authenticated_key_ends_the_session() {
        let tag = SimulatedTag::new();
        let mut executor = connected(&tag).await;
        let (mut session, keys) = authenticate(&mut executor, KeyNo::MASTER, &AesKey::zero())
            .await
            .unwrap();
        let mut plan = sun_plan();
        let master = AesKey::new([0x42; 16]);
        plan.key_changes.insert(
            0,
            crate::config::KeyChange {
                no: KeyNo::MASTER,
                key: master.clone(),
            },
        );

        let mut link = SecureLink::new(&mut executor, &mut session, &keys);
        let ack = write(&mut link, &KeyStore::new(), &plan).await.unwrap();
        assert_eq!(ack.steps.last(), Some(&WriteStep::ChangeKey(KeyNo::MASTER)));
        assert!(ack.session_ended);
        assert_eq!(tag.key(KeyNo::MASTER), master);
        assert!(!tag.is_authenticated());
    }
}
