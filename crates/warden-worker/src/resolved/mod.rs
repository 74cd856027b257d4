//! Resolved calls and their execution.
//!
//! A [`ResolvedCall`] pairs a registered [`CallSpec`] with the package
//! context it runs in. Executing it unpacks the wire parameters, runs the
//! handler, and turns arguments and the return value into output slots
//! according to each argument's direction:
//!
//! | Direction   | Output                                                      |
//! |-------------|-------------------------------------------------------------|
//! | `in`        | none                                                        |
//! | `out`       | a new handle for the value the call produced                |
//! | `inout`     | the argument itself; replacing it is a contract violation   |
//! | `ref-inout` | the replacement if any, otherwise the argument itself       |
//!
//! A caller may also request an output for an `in` argument by setting
//! [`ParamFlags::RETURN`] on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};
use warden_core::protocol::{CallDetails, ParamInfo, ResolvedId};
use warden_core::{
    CallDescriptor, CallFlags, CallParam, CallResult, Direction, HandleId, OutputSlot, ParamFlags,
    ParamValue, RETURN_VALUE, RemoteException, TaintSet, kinds,
};

use crate::capability::{CalloutPort, Capability, TrustedApi};
use crate::context::PackageContext;
use crate::handle::HandleTable;
use crate::invocation::{Arg, Invocation};
use crate::object::{Object, ObjectIds};
use crate::registry::CallSpec;

const RESOLVED_TARGET: &str = "warden_worker::resolved";

/// Worker services a call runs against.
pub(crate) struct CallEnv<'a> {
    pub(crate) handles: &'a HandleTable,
    pub(crate) ids: &'a ObjectIds,
    pub(crate) grants: &'a [Capability],
    pub(crate) port: &'a mut dyn CalloutPort,
}

/// How one argument is handled around the call.
#[derive(Debug, Clone, Copy)]
struct SlotPlan {
    direction: Direction,
    release: bool,
}

/// A registered call bound to the context it runs in.
#[derive(Debug)]
pub struct ResolvedCall {
    id: ResolvedId,
    spec: CallSpec,
    context: Arc<PackageContext>,
}

impl ResolvedCall {
    pub(crate) const fn new(id: ResolvedId, spec: CallSpec, context: Arc<PackageContext>) -> Self {
        Self { id, spec, context }
    }

    /// Identifier handed to the host.
    #[must_use]
    pub const fn id(&self) -> ResolvedId {
        self.id
    }

    /// Registered target of the call.
    #[must_use]
    pub const fn descriptor(&self) -> &CallDescriptor {
        self.spec.descriptor()
    }

    /// Declared result type and argument directions.
    #[must_use]
    pub fn details(&self) -> CallDetails {
        CallDetails {
            result_type: self.spec.result_type().map(str::to_owned),
            params: self
                .spec
                .directions()
                .iter()
                .enumerate()
                .map(|(index, direction)| ParamInfo {
                    type_name: self.spec.param_type(index).unwrap_or_default(),
                    direction: *direction,
                })
                .collect(),
        }
    }

    /// Runs the call.
    ///
    /// Failures never escape as errors: they are reported in the returned
    /// [`CallResult`].
    pub(crate) fn execute(
        self: &Arc<Self>,
        env: CallEnv<'_>,
        flags: CallFlags,
        params: Vec<CallParam>,
        taint: &TaintSet,
    ) -> CallResult {
        let descriptor = self.descriptor();
        let released = released_handles(&params);
        if params.len() != self.spec.directions().len() {
            warn!(
                target: RESOLVED_TARGET,
                descriptor = %descriptor,
                expected = self.spec.directions().len(),
                supplied = params.len(),
                "wrong number of arguments"
            );
            release_all(env.handles, &released);
            return CallResult::failed(RemoteException::illegal_argument(
                "wrong number of arguments supplied",
            ));
        }

        let mut plans = Vec::with_capacity(params.len());
        let mut args = Vec::with_capacity(params.len());
        for (index, (param, declared)) in params.into_iter().zip(self.spec.directions()).enumerate()
        {
            plans.push(SlotPlan {
                direction: effective_direction(*declared, param.flags()),
                release: param.flags().contains(ParamFlags::HANDLE_RELEASE),
            });
            match unpack(index, param, *declared, env.handles, env.ids) {
                Ok(arg) => args.push(arg),
                Err(exception) => {
                    release_all(env.handles, &released);
                    return CallResult::failed(exception);
                }
            }
        }

        let trusted = TrustedApi::new(env.grants, env.port);
        let mut invocation = Invocation::new(args, taint, env.ids, &self.context, trusted);
        let outcome = (self.spec.handler())(&mut invocation);
        let (args, replacements) = invocation.finish();

        let returned = match outcome {
            Ok(returned) => returned,
            Err(exception) => {
                release_all(env.handles, &released);
                if flags.contains(CallFlags::FILTER_EXCEPTIONS) {
                    warn!(
                        target: RESOLVED_TARGET,
                        descriptor = %descriptor,
                        error = %exception,
                        "call failed; exception filtered"
                    );
                    return CallResult::completed(empty_outputs(&plans, flags));
                }
                debug!(target: RESOLVED_TARGET, descriptor = %descriptor, error = %exception, "call failed");
                return CallResult::failed(exception);
            }
        };

        if let Some(index) = replaced_inout(&args, &replacements, &plans) {
            release_all(env.handles, &released);
            return CallResult::failed(RemoteException::new(
                kinds::CONTRACT_VIOLATION,
                format!("{descriptor} replaced inout argument {index}"),
            ));
        }

        let mut outputs = BTreeMap::new();
        let slots = args.into_iter().zip(replacements).zip(plans);
        for (index, ((arg, replacement), plan)) in slots.enumerate() {
            if !plan.direction.produces_output() {
                if replacement.is_some() {
                    warn!(
                        target: RESOLVED_TARGET,
                        descriptor = %descriptor,
                        index,
                        "replacement of an in argument ignored"
                    );
                }
                if let (Arg::Shared(handle), true) = (&arg, plan.release) {
                    env.handles.destroy(handle.id());
                }
                continue;
            }
            let Ok(slot_index) = i32::try_from(index) else {
                continue;
            };
            let declared = self.spec.param_type(index).unwrap_or_default();
            let slot = match (replacement, arg) {
                (Some(replacement), Arg::Shared(previous)) => {
                    env.handles.destroy(previous.id());
                    self.publish(env.handles, declared, replacement)
                }
                (Some(object), Arg::Null | Arg::Owned(_)) | (None, Arg::Owned(object)) => {
                    self.publish(env.handles, declared, object)
                }
                (None, Arg::Shared(handle)) => handle.output_slot(),
                (None, Arg::Null) => None,
            };
            outputs.insert(slot_index, slot);
        }

        if !flags.contains(CallFlags::NO_RETURN_VALUE) {
            let declared = self.spec.result_type().unwrap_or_default().to_owned();
            let slot = returned.and_then(|object| self.publish(env.handles, declared, object));
            outputs.insert(RETURN_VALUE, slot);
        }
        debug!(
            target: RESOLVED_TARGET,
            descriptor = %descriptor,
            outputs = outputs.len(),
            "call completed"
        );
        CallResult::completed(outputs)
    }

    fn publish(
        self: &Arc<Self>,
        handles: &HandleTable,
        declared_type: String,
        object: Object,
    ) -> Option<OutputSlot> {
        handles
            .insert(Some(Arc::clone(self)), declared_type, Some(object))
            .and_then(|handle| handle.output_slot())
    }
}

/// Direction after applying caller flags: an `in` argument flagged as a
/// return slot is treated as `inout`, or `ref-inout` when passed by
/// reference.
const fn effective_direction(declared: Direction, flags: ParamFlags) -> Direction {
    match declared {
        Direction::In if flags.contains(ParamFlags::BY_REF) && flags.contains(ParamFlags::RETURN) => {
            Direction::RefInOut
        }
        Direction::In if flags.contains(ParamFlags::RETURN) => Direction::InOut,
        other => other,
    }
}

fn unpack(
    index: usize,
    param: CallParam,
    declared: Direction,
    handles: &HandleTable,
    ids: &ObjectIds,
) -> Result<Arg, RemoteException> {
    if !declared.carries_input() {
        return Ok(Arg::Null);
    }
    let flags = param.flags();
    match param.into_value() {
        ParamValue::Null => Ok(Arg::Null),
        ParamValue::Data(payload) => Ok(Arg::Owned(ids.wrap_encoded(payload))),
        ParamValue::Handle(id) if flags.contains(ParamFlags::HANDLE_SYNC_ONLY) => {
            warn!(
                target: RESOLVED_TARGET,
                index,
                handle = %id,
                "sync-only handle passed as null"
            );
            Ok(Arg::Null)
        }
        ParamValue::Handle(id) => {
            let handle = handles.get(id)?;
            if handle.is_destroyed() {
                return Err(RemoteException::handle_destroyed());
            }
            Ok(Arg::Shared(handle))
        }
    }
}

fn replaced_inout(args: &[Arg], replacements: &[Option<Object>], plans: &[SlotPlan]) -> Option<usize> {
    args.iter()
        .zip(replacements)
        .zip(plans)
        .position(|((arg, replacement), plan)| {
            replacement.is_some()
                && plan.direction == Direction::InOut
                && !matches!(arg, Arg::Null)
        })
}

/// Handles the caller passed with [`ParamFlags::HANDLE_RELEASE`]. They are
/// consumed by the call whether or not it succeeds.
fn released_handles(params: &[CallParam]) -> Vec<HandleId> {
    params
        .iter()
        .filter(|param| param.flags().contains(ParamFlags::HANDLE_RELEASE))
        .filter_map(|param| match param.value() {
            ParamValue::Handle(id) => Some(*id),
            ParamValue::Null | ParamValue::Data(_) => None,
        })
        .collect()
}

fn release_all(handles: &HandleTable, released: &[HandleId]) {
    for id in released {
        handles.destroy(*id);
    }
}

fn empty_outputs(plans: &[SlotPlan], flags: CallFlags) -> BTreeMap<i32, Option<OutputSlot>> {
    let mut outputs: BTreeMap<i32, Option<OutputSlot>> = plans
        .iter()
        .enumerate()
        .filter(|(_, plan)| plan.direction.produces_output())
        .filter_map(|(index, _)| i32::try_from(index).ok())
        .map(|index| (index, None))
        .collect();
    if !flags.contains(CallFlags::NO_RETURN_VALUE) {
        outputs.insert(RETURN_VALUE, None);
    }
    outputs
}
