//! Inbound command handlers
//!
//! Runs in the reader task. Each handler mutates room state under the
//! state lock and collects the events it produces. The reader emits them
//! once the lock is released. A handler error is logged and the frame
//! dropped, the session carries on.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::command::{BlockRecord, Command, JoinAck, MessageContent, ParticipantRecord};
use crate::error::{AuthError, ProtocolError};
use crate::event::{Ban, ErrorCode, RoomEvent};
use crate::identity::{anon_name, anon_tag_from_time, Identity, IdentityKind, IdentityRegistry};
use crate::message::{timestamp_from_secs, Message};
use crate::presence::PresenceChange;
use crate::room::parse_moderators;
use crate::session::RoomInner;
use crate::signal::Signal;

/// Wire placeholder for an absent name
const NO_NAME: &str = "None";

type Events = Vec<RoomEvent>;

impl RoomInner {
    /// Route one command to its handler; returns the events it produced
    pub(crate) fn dispatch(&self, cmd: Command) -> Events {
        let name = cmd.name();
        let mut events = Events::new();

        let result = match cmd {
            Command::Ok(ack) => self.handle_join_ack(ack),
            Command::Inited => {
                self.signals.resolve(Signal::Inited, Ok(()));
                Ok(())
            }
            Command::PasswordOk | Command::AliasOk => {
                self.signals.resolve(Signal::Authenticated, Ok(()));
                Ok(())
            }
            Command::BadLogin => self.handle_rejected(AuthError::BadLogin, &mut events),
            Command::BadAlias => self.handle_rejected(AuthError::BadAlias, &mut events),
            Command::ParticipantCount { count_hex } => self.handle_count(&count_hex),
            Command::Message(content) => self.handle_content(&content, &mut events),
            Command::MessageId {
                pending_id,
                final_id,
            } => self.handle_message_id(&pending_id, &final_id, &mut events),
            Command::Mods { list } => self.handle_mods(&list, &mut events),
            Command::Participants {
                unregistered_count,
                records,
            } => self.handle_participants(&unregistered_count, &records),
            Command::Participant(record) => self.handle_participant(&record, &mut events),
            Command::SpamBanWarning => {
                events.push(RoomEvent::SpamBanWarning);
                Ok(())
            }
            Command::SpamBan => {
                events.push(RoomEvent::SpamBan);
                Ok(())
            }
            Command::FloodBanWarning => {
                events.push(RoomEvent::FloodBanWarning);
                Ok(())
            }
            Command::FloodBan { seconds } => parse_seconds("show_tb", &seconds).map(|s| {
                events.push(RoomEvent::FloodBan {
                    seconds_remaining: s,
                })
            }),
            Command::FloodBanTimeout { seconds } => parse_seconds("tb", &seconds).map(|s| {
                events.push(RoomEvent::FloodBanTimeout {
                    seconds_remaining: s,
                })
            }),
            Command::RateLimited {
                server_time,
                request,
            } => {
                warn!(session = %self.key, server_time = %server_time, "request throttled: {}", request);
                events.push(RoomEvent::Error {
                    code: ErrorCode::RateLimited,
                    message: format!("request throttled: {}", request),
                });
                Ok(())
            }
            Command::Delete { message_id } => {
                self.handle_delete(std::iter::once(message_id), &mut events);
                Ok(())
            }
            Command::DeleteAll { message_ids } => {
                self.handle_delete(message_ids.into_iter(), &mut events);
                Ok(())
            }
            Command::Blocked(record) => {
                events.push(RoomEvent::Ban { ban: ban(record) });
                Ok(())
            }
            Command::Unblocked(record) => {
                events.push(RoomEvent::Unban { ban: ban(record) });
                Ok(())
            }
            Command::History | Command::HistoryEnd | Command::Relogin | Command::Denied => {
                debug!(session = %self.key, command = name, "ignored");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(session = %self.key, command = name, "handler failed: {}", e);
        }
        events
    }

    fn handle_join_ack(&self, ack: JoinAck) -> Result<(), ProtocolError> {
        let server_time: f64 = ack.server_time.parse().map_err(|_| ProtocolError::InvalidField {
            command: "ok",
            field: "server_time",
            value: ack.server_time.clone(),
        })?;
        let moderators = parse_moderators(&ack.moderators)?;

        if self.identity.kind() == IdentityKind::Anonymous {
            let name = anon_name(&anon_tag_from_time(&ack.server_time), &ack.session_id)?;
            self.identity.set_name(&name);
        }
        self.identity.set_presence_id(&ack.session_id);
        self.identity.set_origin_ip(&ack.ip);
        self.identity.set_last_joined_at(Utc::now());

        let mut state = self.state.lock();
        state.owner = ack.owner.to_lowercase();
        state.session_id = ack.session_id;
        state.session_status = ack.session_status;
        state.server_ip = ack.ip;
        state.server_id = ack.server_id;
        state.server_time = server_time;
        state.server_time_raw = ack.server_time;
        state.set_moderators(moderators);
        state.identities.insert(&self.identity);

        info!(
            room = %state.name,
            session = %self.key,
            owner = %state.owner,
            "join acknowledged as {}",
            self.identity.name()
        );
        Ok(())
    }

    fn handle_rejected(&self, err: AuthError, events: &mut Events) -> Result<(), ProtocolError> {
        warn!(session = %self.key, identity = %self.identity.name(), "{}", err);
        events.push(RoomEvent::from(&err));
        self.signals.resolve(Signal::Authenticated, Err(err));
        Ok(())
    }

    fn handle_count(&self, count_hex: &str) -> Result<(), ProtocolError> {
        let count = u32::from_str_radix(count_hex, 16).map_err(|_| ProtocolError::InvalidField {
            command: "n",
            field: "count",
            value: count_hex.to_string(),
        })?;
        self.state.lock().participant_count = count;
        Ok(())
    }

    fn handle_content(&self, content: &MessageContent, events: &mut Events) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let message = Message::decode(&state.name, content, &mut state.identities)?;
        if let Some(published) = state.cache.submit(message) {
            events.push(RoomEvent::Message { message: published });
        }
        Ok(())
    }

    fn handle_message_id(
        &self,
        pending_id: &str,
        final_id: &str,
        events: &mut Events,
    ) -> Result<(), ProtocolError> {
        if final_id.is_empty() {
            return Err(ProtocolError::InvalidField {
                command: "u",
                field: "final_id",
                value: String::new(),
            });
        }
        if let Some(published) = self.state.lock().cache.publish(pending_id, final_id) {
            events.push(RoomEvent::Message { message: published });
        }
        Ok(())
    }

    fn handle_mods(&self, list: &str, events: &mut Events) -> Result<(), ProtocolError> {
        let moderators = parse_moderators(list)?;
        self.state.lock().set_moderators(moderators.clone());
        events.push(RoomEvent::ModUpdate { moderators });
        Ok(())
    }

    /// Full participant list: fills presence without events
    fn handle_participants(&self, unregistered: &str, records: &str) -> Result<(), ProtocolError> {
        let unregistered_count = unregistered.parse().map_err(|_| ProtocolError::InvalidField {
            command: "gparticipants",
            field: "unregistered_count",
            value: unregistered.to_string(),
        })?;

        {
            let mut state = self.state.lock();
            let state = &mut *state;
            state.unregistered_count = unregistered_count;

            for record in records.split(';').filter(|r| !r.is_empty()) {
                let f: Vec<&str> = record.split(':').collect();
                let field = |i: usize| f.get(i).copied().unwrap_or_default();
                let (connection_id, joined_at, session_id) = (field(0), field(1), field(2));

                let identity = match participant_identity(
                    &mut state.identities,
                    field(3),
                    field(4),
                    session_id,
                    joined_at,
                ) {
                    Ok(identity) => identity,
                    Err(e) => {
                        warn!(session = %self.key, "skipping participant {:?}: {}", record, e);
                        continue;
                    }
                };
                touch_presence(&identity, session_id, joined_at);
                state.presence.join(&identity, connection_id);
            }
            state.presence_synced = true;
            debug!(
                room = %state.name,
                session = %self.key,
                members = state.presence.len(),
                "participant list applied"
            );
        }

        self.signals.resolve(Signal::ParticipantsSynced, Ok(()));
        Ok(())
    }

    fn handle_participant(&self, record: &ParticipantRecord, events: &mut Events) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let identity = participant_identity(
            &mut state.identities,
            &record.name,
            &record.temp_name,
            &record.session_id,
            &record.joined_at,
        )?;

        match record.status.as_str() {
            "0" => {
                if let Some(left) = state.presence.leave(&identity.name(), &record.connection_id) {
                    events.push(RoomEvent::Leave { identity: left });
                }
            }
            "1" | "2" => {
                touch_presence(&identity, &record.session_id, &record.joined_at);
                for change in state.presence.join(&identity, &record.connection_id) {
                    events.push(match change {
                        PresenceChange::Joined(identity) => RoomEvent::Join { identity },
                        PresenceChange::Left(identity) => RoomEvent::Leave { identity },
                    });
                }
            }
            other => {
                return Err(ProtocolError::InvalidField {
                    command: "participant",
                    field: "status",
                    value: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn handle_delete(&self, ids: impl Iterator<Item = String>, events: &mut Events) {
        let mut state = self.state.lock();
        for message_id in ids.filter(|id| !id.is_empty()) {
            let message = state.cache.remove(&message_id);
            events.push(RoomEvent::MessageDelete {
                message_id,
                message,
            });
        }
    }
}

/// Identity named by a participant record
///
/// A registered name wins, then a temporary one; otherwise the anonymous
/// name is derived from the join time and session id.
fn participant_identity(
    registry: &mut IdentityRegistry,
    name: &str,
    temp_name: &str,
    session_id: &str,
    joined_at: &str,
) -> Result<Arc<Identity>, ProtocolError> {
    let present = |s: &str| !s.is_empty() && s != NO_NAME;

    if present(name) {
        Ok(registry.resolve(name, IdentityKind::Registered))
    } else if present(temp_name) {
        Ok(registry.resolve(temp_name, IdentityKind::Temporary))
    } else {
        let anon = anon_name(&anon_tag_from_time(joined_at), session_id)?;
        Ok(registry.resolve(&anon, IdentityKind::Anonymous))
    }
}

fn touch_presence(identity: &Identity, session_id: &str, joined_at: &str) {
    identity.set_presence_id(session_id);
    if let Some(at) = timestamp_from_secs(joined_at) {
        identity.set_last_joined_at(at);
    }
}

fn parse_seconds(command: &'static str, value: &str) -> Result<u32, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::InvalidField {
        command,
        field: "seconds",
        value: value.to_string(),
    })
}

fn ban(record: BlockRecord) -> Ban {
    Ban {
        unique_id: record.unique_id,
        ip: record.ip,
        name: record.name,
        session_id: record.session_id,
        server_time: record.server_time,
    }
}
