#[cfg(test)]
mod test;

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{context::OperationContext, Client};
use crate::{
    cmap::{conn::wire::next_request_id, StreamDescription},
    cursor::{Cursor, CursorSpecification},
    error::{Error, ErrorKind, Result, RETRYABLE_WRITE_ERROR},
    operation::{GetMore, Operation, Retryability},
    results::GetMoreResult,
    session::ClientSession,
    trace,
};

/// The outcome of a single attempt of an operation, classified for the retry
/// state machine.
enum AttemptOutcome<O> {
    Ok(O),
    /// The attempt failed with an error the operation's retryability level can
    /// recover from.
    Retryable(Error),
    /// The attempt failed terminally.
    Fatal(Error),
}

pub(crate) struct ExecutionDetails<T: Operation> {
    pub(crate) output: T::O,
    pub(crate) context: OperationContext,
    pub(crate) implicit_session: Option<ClientSession>,
}

impl Client {
    /// Execute the given operation, including a single retry upon failure when
    /// the operation, the session, and the selected server all support it.
    ///
    /// An implicit session will be created if the operation and write concern
    /// are compatible with sessions and an explicit session is not provided.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: &mut T,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<T::O> {
        self.execute_operation_with_details(op, session.into(), CancellationToken::new())
            .await
            .map(|details| details.output)
    }

    /// Execute the given operation under a caller-provided cancellation token.
    pub(crate) async fn execute_operation_with_cancellation<T: Operation>(
        &self,
        op: &mut T,
        session: impl Into<Option<&mut ClientSession>>,
        cancellation: CancellationToken,
    ) -> Result<T::O> {
        self.execute_operation_with_details(op, session.into(), cancellation)
            .await
            .map(|details| details.output)
    }

    /// Execute the given operation, returning the cursor created by it. The
    /// cursor pins the connection that served the command whenever a
    /// continuation command would have to reach the same backend: on
    /// load-balanced topologies and for any live server-side cursor.
    pub(crate) async fn execute_cursor_operation<Op, T>(&self, op: &mut Op) -> Result<Cursor<T>>
    where
        Op: Operation<O = CursorSpecification>,
    {
        let mut details = self
            .execute_operation_with_details(op, None, CancellationToken::new())
            .await?;
        let pinned = if self.is_load_balanced() || details.output.id() != 0 {
            Some(details.context.connection_mut()?.pin()?)
        } else {
            None
        };
        Ok(Cursor::new(
            self.clone(),
            details.output,
            details.implicit_session,
            pinned,
        ))
    }

    /// Executes a cursor continuation operation on behalf of a cursor.
    pub(crate) async fn execute_get_more(
        &self,
        mut op: GetMore<'_>,
        session: Option<&mut ClientSession>,
    ) -> Result<GetMoreResult> {
        self.execute_operation(&mut op, session).await
    }

    async fn execute_operation_with_details<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionDetails<T>> {
        if self.is_shut_down() {
            return Err(ErrorKind::Shutdown.into());
        }
        if let Some(write_concern) = op.write_concern() {
            write_concern.validate()?;
        }

        let retry_requested = match op.retryability() {
            Retryability::Write => self.options().retry_writes_enabled(),
            Retryability::Read => self.options().retry_reads_enabled(),
            Retryability::None => false,
        };

        // Leasing a connection can itself fail with a transient fault (most
        // notably a paused pool); when the operation and session would qualify
        // for a retry, the acquisition is retried once against a fresh
        // selection.
        let pinned = op.pinned_connection().map(|handle| handle.replicate());
        let criteria = op.selection_criteria();
        let mut context = match OperationContext::new(
            self.selector().as_ref(),
            criteria,
            pinned.as_ref(),
            retry_requested,
            cancellation.clone(),
        )
        .await
        {
            Ok(context) => context,
            Err(error)
                if can_retry_acquisition(&error, retry_requested, &session, op.retryability()) =>
            {
                OperationContext::new(
                    self.selector().as_ref(),
                    criteria,
                    pinned.as_ref(),
                    retry_requested,
                    cancellation.clone(),
                )
                .await
                .map_err(|_| error)?
            }
            Err(error) => return Err(error),
        };

        // Sessions are only usable against deployments that track them.
        let mut implicit_session = None;
        if session.is_none()
            && op.supports_sessions()
            && op.is_acknowledged()
            && context.stream_description()?.supports_sessions()
        {
            implicit_session = Some(ClientSession::new(None, true));
            session = implicit_session.as_mut();
        }

        let retryability = self.get_retryability(op, &session, context.stream_description()?);

        // The transaction number is advanced exactly once per operation; both
        // attempts replay the same value so the server can deduplicate.
        let txn_number = if retryability == Retryability::Write {
            session.as_deref().map(|s| s.advance_transaction_number())
        } else {
            None
        };

        let first_error = match self
            .execute_attempt(op, &mut context, &mut session, txn_number, retryability)
            .await
        {
            AttemptOutcome::Ok(output) => {
                return Ok(ExecutionDetails {
                    output,
                    context,
                    implicit_session,
                })
            }
            AttemptOutcome::Fatal(error) => return Err(error),
            AttemptOutcome::Retryable(error) => error,
        };

        // A cancellation raised between the first attempt's classification and
        // the retry supersedes the saved error.
        if cancellation.is_cancelled() {
            return Err(Error::cancelled());
        }

        op.update_for_retry();

        // Stage the retry on a freshly selected server and connection. If the
        // retry cannot be staged, the original failure is the operative error.
        let server = match self.selector().select_server(op.selection_criteria()).await {
            Ok(server) => server,
            Err(_) => return Err(first_error),
        };
        context.replace_server(server);
        let connection = match context.checkout_connection().await {
            Ok(connection) => connection,
            Err(_) => return Err(first_error),
        };
        context.replace_connection(connection);

        // The fresh channel must re-qualify; a server that cannot deduplicate
        // the replay never sees attempt two.
        let retryability = self.get_retryability(op, &session, context.stream_description()?);
        if retryability == Retryability::None {
            return Err(first_error);
        }

        match self
            .execute_attempt(op, &mut context, &mut session, txn_number, retryability)
            .await
        {
            AttemptOutcome::Ok(output) => Ok(ExecutionDetails {
                output,
                context,
                implicit_session,
            }),
            AttemptOutcome::Retryable(retry_error) | AttemptOutcome::Fatal(retry_error) => {
                if retry_error.should_surface_original_error() {
                    Err(first_error)
                } else {
                    Err(retry_error)
                }
            }
        }
    }

    /// Runs one attempt of the operation on the context's connection and
    /// classifies any failure against the effective retryability level.
    async fn execute_attempt<T: Operation>(
        &self,
        op: &mut T,
        context: &mut OperationContext,
        session: &mut Option<&mut ClientSession>,
        txn_number: Option<i64>,
        retryability: Retryability,
    ) -> AttemptOutcome<T::O> {
        if context.cancellation().is_cancelled() {
            return AttemptOutcome::Fatal(Error::cancelled());
        }
        let wire_version = context
            .stream_description()
            .ok()
            .and_then(|description| description.max_wire_version);
        match self
            .execute_operation_on_connection(op, context, session, txn_number)
            .await
        {
            Ok(output) => AttemptOutcome::Ok(output),
            Err(mut error) => {
                error.wire_version = wire_version;
                if retryability == Retryability::Write {
                    if let Some(wire_version) = wire_version {
                        if error.should_add_retryable_write_label(wire_version) {
                            error.add_label(RETRYABLE_WRITE_ERROR);
                        }
                    }
                }
                if context.retry_requested() && retryability.can_retry_error(&error) {
                    AttemptOutcome::Retryable(error)
                } else {
                    AttemptOutcome::Fatal(error)
                }
            }
        }
    }

    /// Executes an operation on a given connection, optionally using a
    /// provided session.
    async fn execute_operation_on_connection<T: Operation>(
        &self,
        op: &mut T,
        context: &mut OperationContext,
        session: &mut Option<&mut ClientSession>,
        txn_number: Option<i64>,
    ) -> Result<T::O> {
        let description = context.stream_description()?.clone();
        let mut cmd = op.build(&description)?;

        if let Some(read_preference) = op
            .selection_criteria()
            .and_then(|criteria| criteria.as_read_pref())
        {
            if *read_preference != crate::options::ReadPreference::Primary {
                cmd.set_read_preference(read_preference.clone());
            }
        }

        match session {
            Some(ref mut session) if op.supports_sessions() && op.is_acknowledged() => {
                cmd.set_session(session);
                if let Some(txn_number) = txn_number {
                    cmd.set_txn_number(txn_number);
                }
                if session.is_snapshot() {
                    cmd.set_snapshot_read_concern(session);
                } else if session.causal_consistency() {
                    cmd.set_after_cluster_time(session);
                }
                if session.in_transaction() {
                    // commands in a transaction inherit its write concern
                    cmd.clear_write_concern();
                }
            }
            Some(ref session) if !op.supports_sessions() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("{} does not support sessions", cmd.name),
                }
                .into());
            }
            Some(ref session) if !op.is_acknowledged() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: "Cannot use explicit sessions with unacknowledged write concern"
                        .to_string(),
                }
                .into());
            }
            _ => {}
        }

        if let Some(ref server_api) = self.options().server_api {
            cmd.set_server_api(server_api);
        }

        let request_id = next_request_id();
        let command_name = cmd.name.clone();
        let connection = context.connection_mut()?;
        trace::command_started(&command_name, request_id, &cmd.target_db, &cmd.body, connection);

        let start_time = Instant::now();
        let response_result = connection.send_command(cmd, request_id).await;
        let duration = start_time.elapsed();

        let response = match response_result {
            Ok(response) => response,
            Err(error) => {
                trace::command_failed(&command_name, request_id, duration, &error, connection);
                if let Some(ref mut session) = session {
                    if error.is_network_error() {
                        session.mark_dirty();
                    }
                }
                return op.handle_error(error);
            }
        };

        match parse_response(op, session, &response) {
            Ok(()) => {
                trace::command_succeeded(
                    &command_name,
                    request_id,
                    duration,
                    crate::bson::Document::try_from(response.raw_body()).ok().as_ref(),
                    connection,
                );
                op.handle_response(&response, &description)
            }
            Err(error) => {
                trace::command_failed(&command_name, request_id, duration, &error, connection);
                op.handle_error(error)
            }
        }
    }

    /// Returns the retryability level for the execution of this operation with
    /// the given session and connection description. All of the preconditions
    /// for a retried write are checked here: the operation's own level, the
    /// client options, an acknowledged write concern, a live session, no open
    /// transaction, and a server that can deduplicate replays.
    fn get_retryability<T: Operation>(
        &self,
        op: &T,
        session: &Option<&mut ClientSession>,
        description: &StreamDescription,
    ) -> Retryability {
        if session
            .as_ref()
            .map_or(false, |session| session.in_transaction())
        {
            return Retryability::None;
        }
        match op.retryability().with_options(self.options()) {
            Retryability::Write
                if op.is_acknowledged()
                    && session.is_some()
                    && description.supports_retryable_writes() =>
            {
                Retryability::Write
            }
            Retryability::Read => Retryability::Read,
            _ => Retryability::None,
        }
    }
}

/// Whether a failure to lease a connection should escalate to a full retry of
/// the acquisition.
fn can_retry_acquisition(
    error: &Error,
    retry_requested: bool,
    session: &Option<&mut ClientSession>,
    retryability: Retryability,
) -> bool {
    if !retry_requested || !error.is_connection_error() {
        return false;
    }
    let in_transaction = session
        .as_ref()
        .map_or(false, |session| session.in_transaction());
    match retryability {
        Retryability::Read => true,
        Retryability::Write => session.is_some() && !in_transaction,
        Retryability::None => false,
    }
}

/// Validates the `ok` field of the response, converts command failures into
/// errors, and folds the response's timing fields into the session.
fn parse_response<T: Operation>(
    op: &T,
    session: &mut Option<&mut ClientSession>,
    response: &crate::cmap::RawCommandResponse,
) -> Result<()> {
    let raw = response.raw_body();

    let ok = match raw.get("ok")? {
        Some(value) => crate::bson_util::get_int_raw(value).ok_or_else(|| {
            Error::invalid_response(format!("expected ok value to be a number, got {:?}", value))
        })?,
        None => {
            return Err(Error::invalid_response("missing 'ok' value in response"));
        }
    };

    if let Some(ref mut session) = session {
        if let Some(operation_time) = response.operation_time()? {
            session.advance_operation_time(operation_time);
        }
        if let Some(at_cluster_time) = op.extract_at_cluster_time(raw)? {
            session.snapshot_time = Some(at_cluster_time);
        }
    }

    if ok == 1 {
        Ok(())
    } else {
        Err(response
            .body::<crate::operation::CommandErrorBody>()
            .map(Error::from)
            .unwrap_or_else(|e| {
                Error::invalid_response(format!("error deserializing command error: {}", e))
            }))
    }
}
