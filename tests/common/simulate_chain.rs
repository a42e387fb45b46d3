use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use pchain_async_engine::{
    codec::{
        parse_call_data, parse_callback_call_data, BuiltinEsdtTransferParser, CallDataBuilder,
        CallLinkage,
        EsdtTransferParser, ESDT_NFT_TRANSFER, ESDT_TRANSFER, MULTI_ESDT_NFT_TRANSFER,
    },
    gas::{GasMeter, GasSchedule},
    host::{Blockchain, Metering, NestedOutcome, Output, Runtime, Storage, VmHost},
    types::{
        AsyncArguments, Breakpoint, CallType, ContractCallInput, OutputAccount, OutputTransfer,
        PublicAddress, ReturnCode, VmOutput, CALLBACK_PLACEHOLDER_FUNCTION, INIT_FUNCTION_NAME,
    },
    AsyncContext, AsyncError, EngineConfig,
};
use tracing::info_span;
use tracing_subscriber::EnvFilter;

/// Gas charged by the simulated built-in token transfers.
pub const BUILTIN_FUNCTION_COST: u64 = 5;

/// A contract function of the simulated chain.
pub type ContractFunction = Rc<dyn Fn(&mut SimulateChain, &mut AsyncContext) -> Result<(), AsyncError>>;

#[derive(Clone, Default)]
pub struct SimulateAccount {
    pub code: Vec<u8>,
    pub functions: HashMap<String, ContractFunction>,
    pub shard: u32,
}

/// A running contract instance.
pub struct Frame {
    pub input: ContractCallInput,
    pub meter: GasMeter,
    pub output: VmOutput,
    pub breakpoint: Breakpoint,
}

impl Frame {
    pub fn new(schedule: GasSchedule, input: ContractCallInput) -> Self {
        let meter = GasMeter::new(schedule, input.gas_provided);
        Self {
            input,
            meter,
            output: VmOutput::default(),
            breakpoint: Breakpoint::None,
        }
    }
}

/// Result of one transaction of the simulated chain.
#[derive(Clone, Debug)]
pub struct TxOutcome {
    pub vm_output: VmOutput,
    pub gas_used: u64,
}

impl TxOutcome {
    /// Asynchronous calls and callbacks sent to other shards, in emission order per destination.
    pub fn outbound(&self) -> Vec<(PublicAddress, OutputTransfer)> {
        self.vm_output
            .output_accounts
            .iter()
            .flat_map(|(destination, account)| {
                account
                    .output_transfers
                    .iter()
                    .filter(|transfer| transfer.call_type.is_async())
                    .map(|transfer| (*destination, transfer.clone()))
            })
            .collect()
    }
}

/// A host running closures as contracts, with accounts spread over shards and a single storage.
pub struct SimulateChain {
    pub schedule: GasSchedule,
    pub config: EngineConfig,
    pub accounts: HashMap<PublicAddress, SimulateAccount>,
    pub storage: HashMap<(PublicAddress, Vec<u8>), Vec<u8>>,
    pub frames: Vec<Frame>,
    /// Inputs of every contract function run, in order, named after the function actually run.
    pub executed: Vec<ContractCallInput>,
}

/// Prints engine events of the tests when `RUST_LOG` asks for them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl SimulateChain {
    pub fn new(schedule: GasSchedule) -> Self {
        init_tracing();
        Self {
            schedule,
            config: EngineConfig::default(),
            accounts: HashMap::new(),
            storage: HashMap::new(),
            frames: Vec::new(),
            executed: Vec::new(),
        }
    }

    pub fn add_contract(&mut self, address: PublicAddress, shard: u32) {
        self.accounts.insert(
            address,
            SimulateAccount {
                code: vec![0u8; 10],
                functions: HashMap::new(),
                shard,
            },
        );
    }

    pub fn add_user(&mut self, address: PublicAddress, shard: u32) {
        self.accounts.insert(
            address,
            SimulateAccount {
                shard,
                ..Default::default()
            },
        );
    }

    pub fn add_function<F>(&mut self, address: PublicAddress, name: &str, function: F)
    where
        F: Fn(&mut SimulateChain, &mut AsyncContext) -> Result<(), AsyncError> + 'static,
    {
        self.accounts
            .get_mut(&address)
            .expect("contract added before its functions")
            .functions
            .insert(name.to_string(), Rc::new(function));
    }

    /// Number of records kept by the engine in the storage of `address`.
    pub fn stored_records(&self, address: &PublicAddress) -> usize {
        self.storage.keys().filter(|(owner, _)| owner == address).count()
    }

    /* ↓↓↓ Transactions ↓↓↓ */

    pub fn run_transaction(&mut self, input: ContractCallInput) -> Result<TxOutcome, AsyncError> {
        let span = info_span!("transaction", tx_hash = %hex::encode(input.current_tx_hash));
        let mut async_ctx = AsyncContext::new(self.config.clone(), span);
        async_ctx.init_state_from_input(&input, input.caller)?;
        self.frames.push(Frame::new(self.schedule, input));

        let result = async_ctx.call_sc_method(self);
        let frame = self.frames.pop().expect("transaction frame");
        result?;

        let mut vm_output = frame.output;
        vm_output.gas_remaining = frame.meter.gas_left();
        Ok(TxOutcome {
            vm_output,
            gas_used: frame.meter.gas_used(),
        })
    }

    /// Runs the transaction carrying `transfer`, sent by an asynchronous call or callback
    /// to `destination` in another shard.
    pub fn deliver(
        &mut self,
        destination: PublicAddress,
        transfer: &OutputTransfer,
        tx_hash: [u8; 32],
    ) -> Result<TxOutcome, AsyncError> {
        let (function, arguments, transfer_call, async_arguments) = match transfer.call_type {
            CallType::AsynchronousCall => {
                let (function, arguments) = parse_call_data(&transfer.data)?;
                let transfer_call = self
                    .is_builtin_function_name(&function)
                    .then(|| (function.clone(), arguments.clone()));
                (
                    function,
                    arguments,
                    transfer_call,
                    AsyncArguments::from_call_linkage(&transfer.async_data)?,
                )
            }
            CallType::AsynchronousCallBack => {
                let callback_data = parse_callback_call_data(&transfer.data)?;
                (
                    CALLBACK_PLACEHOLDER_FUNCTION.to_string(),
                    callback_data.arguments,
                    callback_data.transfer,
                    AsyncArguments::from_callback_linkage(&transfer.async_data)?,
                )
            }
            CallType::DirectCall => panic!("only async transfers are delivered"),
        };
        let esdt_transfers = match transfer_call {
            Some((transfer_function, transfer_arguments)) => {
                BuiltinEsdtTransferParser
                    .parse_esdt_transfers(
                        &transfer.sender,
                        &destination,
                        &transfer_function,
                        &transfer_arguments,
                    )?
                    .esdt_transfers
            }
            None => Vec::new(),
        };

        self.run_transaction(ContractCallInput {
            original_caller: transfer.sender,
            caller: transfer.sender,
            recipient: destination,
            function,
            arguments,
            call_value: transfer.value,
            call_type: transfer.call_type,
            gas_price: 1,
            gas_provided: transfer.gas_limit,
            gas_locked: transfer.gas_locked,
            current_tx_hash: tx_hash,
            original_tx_hash: tx_hash,
            esdt_transfers,
            async_arguments: Some(async_arguments),
            ..Default::default()
        })
    }

    /* ↓↓↓ Contract API ↓↓↓ */

    pub fn finish(&mut self, data: &[u8]) {
        self.frame_mut().output.return_data.push(data.to_vec());
    }

    /// Consumes gas as contract code would, failing the execution when it runs out.
    pub fn consume(&mut self, gas: u64) -> Result<(), AsyncError> {
        self.use_gas_bounded(gas).map_err(|_| AsyncError::ExecutionFailed {
            code: ReturnCode::OutOfGas,
            message: "out of gas".to_string(),
        })
    }

    pub fn arguments(&self) -> Vec<Vec<u8>> {
        self.frame().input.arguments.clone()
    }

    pub fn fail(message: &str) -> AsyncError {
        AsyncError::ExecutionFailed {
            code: ReturnCode::UserError,
            message: message.to_string(),
        }
    }

    /// Calls `function` of `destination` synchronously, as a child of the running context.
    pub fn execute_direct_call(
        &mut self,
        async_ctx: &mut AsyncContext,
        destination: PublicAddress,
        function: &str,
        gas: u64,
    ) -> Result<NestedOutcome, AsyncError> {
        let caller_input = self.frame().input.clone();
        let mut input = ContractCallInput {
            original_caller: caller_input.original_caller,
            caller: self.context_address(),
            recipient: destination,
            function: function.to_string(),
            call_type: CallType::DirectCall,
            gas_price: caller_input.gas_price,
            gas_provided: gas,
            current_tx_hash: caller_input.current_tx_hash,
            original_tx_hash: caller_input.original_tx_hash,
            ..Default::default()
        };
        async_ctx.set_async_arguments_for_call(&mut input);
        let outcome = self.execute_on_dest_context(async_ctx, input)?;
        async_ctx.complete_child_conditional(outcome.is_complete, None, 0)?;
        Ok(outcome)
    }

    /* ↓↓↓ Internals ↓↓↓ */

    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("a running frame")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("a running frame")
    }

    fn shard_of(&self, address: &PublicAddress) -> u32 {
        self.accounts.get(address).map_or(0, |account| account.shard)
    }

    fn contract_function(&self, address: &PublicAddress, name: &str) -> Option<ContractFunction> {
        self.accounts
            .get(address)
            .and_then(|account| account.functions.get(name))
            .cloned()
    }

    /// In-shard effect of a built-in token transfer: the tokens leave the caller. An asynchronous
    /// call to another shard goes on as an asynchronous call linked to its caller, taking all the
    /// gas left with it.
    fn run_builtin_function(&self, input: &ContractCallInput) -> Result<VmOutput, AsyncError> {
        let parsed = match BuiltinEsdtTransferParser.parse_esdt_transfers(
            &input.caller,
            &input.recipient,
            &input.function,
            &input.arguments,
        ) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(VmOutput::failure(ReturnCode::UserError, e.to_string())),
        };
        if parsed.esdt_transfers.iter().any(|transfer| transfer.value == 0) {
            return Ok(VmOutput::failure(ReturnCode::OutOfFunds, "insufficient funds"));
        }

        let mut gas_remaining = input.gas_provided.saturating_sub(BUILTIN_FUNCTION_COST);
        let mut transfer = OutputTransfer {
            sender: input.caller,
            data: CallDataBuilder::new(&input.function)
                .arguments(&input.arguments)
                .build(),
            ..Default::default()
        };
        let cross_shard = !self.are_in_same_shard(&input.caller, &parsed.receiver);
        if input.call_type == CallType::AsynchronousCall && cross_shard {
            let async_arguments = input
                .async_arguments
                .as_ref()
                .ok_or(AsyncError::MissingAsyncArguments)?;
            transfer.value = input.call_value;
            transfer.gas_limit = gas_remaining;
            transfer.gas_locked = input.gas_locked;
            transfer.call_type = CallType::AsynchronousCall;
            transfer.async_data = CallLinkage {
                call_id: async_arguments.call_id,
                caller_call_id: async_arguments.caller_call_id.unwrap_or_default(),
            }
            .encode()?;
            gas_remaining = 0;
        }

        let mut output_accounts = BTreeMap::new();
        output_accounts.insert(
            parsed.receiver,
            OutputAccount {
                address: parsed.receiver,
                balance_delta: 0,
                output_transfers: vec![transfer],
            },
        );
        Ok(VmOutput {
            gas_remaining,
            output_accounts,
            ..Default::default()
        })
    }

    fn merge_output_accounts(&mut self, nested: &VmOutput) {
        let output = &mut self.frame_mut().output;
        for (address, account) in &nested.output_accounts {
            let merged = output
                .output_accounts
                .entry(*address)
                .or_insert_with(|| OutputAccount {
                    address: *address,
                    ..Default::default()
                });
            merged.balance_delta += account.balance_delta;
            merged
                .output_transfers
                .extend(account.output_transfers.iter().cloned());
        }
    }
}

impl Metering for SimulateChain {
    fn gas_schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    fn gas_left(&self) -> u64 {
        self.frame().meter.gas_left()
    }

    fn use_gas(&mut self, gas: u64) {
        self.frame_mut().meter.use_gas(gas)
    }

    fn restore_gas(&mut self, gas: u64) {
        self.frame_mut().meter.restore_gas(gas)
    }

    fn disable_restore_gas(&mut self) {
        self.frame_mut().meter.disable_restore_gas()
    }

    fn enable_restore_gas(&mut self) {
        self.frame_mut().meter.enable_restore_gas()
    }
}

impl Runtime for SimulateChain {
    fn vm_input(&self) -> &ContractCallInput {
        &self.frame().input
    }

    fn context_address(&self) -> PublicAddress {
        self.frame().input.recipient
    }

    fn code_size(&self) -> u64 {
        self.accounts
            .get(&self.context_address())
            .map_or(0, |account| account.code.len() as u64)
    }

    fn has_function(&self, name: &str) -> bool {
        self.contract_function(&self.context_address(), name).is_some()
    }

    fn validate_callback_name(&self, name: &str) -> Result<(), AsyncError> {
        if name == INIT_FUNCTION_NAME || self.is_builtin_function_name(name) || !self.has_function(name) {
            return Err(AsyncError::InvalidCallbackName(name.to_string()));
        }
        Ok(())
    }

    fn set_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.frame_mut().breakpoint = breakpoint;
    }
}

impl Output for SimulateChain {
    fn transfer(
        &mut self,
        destination: PublicAddress,
        transfer: OutputTransfer,
    ) -> Result<(), AsyncError> {
        self.frame_mut()
            .output
            .output_accounts
            .entry(destination)
            .or_insert_with(|| OutputAccount {
                address: destination,
                ..Default::default()
            })
            .output_transfers
            .push(transfer);
        Ok(())
    }

    fn vm_output(&self) -> VmOutput {
        let frame = self.frame();
        let mut vm_output = frame.output.clone();
        vm_output.gas_remaining = frame.meter.gas_left();
        vm_output
    }
}

impl Storage for SimulateChain {
    fn get_storage_unmetered(&self, address: &PublicAddress, key: &[u8]) -> Vec<u8> {
        self.storage
            .get(&(*address, key.to_vec()))
            .cloned()
            .unwrap_or_default()
    }

    fn set_protected_storage_unmetered(
        &mut self,
        address: &PublicAddress,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<(), AsyncError> {
        if value.is_empty() {
            self.storage.remove(&(*address, key.to_vec()));
        } else {
            self.storage.insert((*address, key.to_vec()), value);
        }
        Ok(())
    }
}

impl Blockchain for SimulateChain {
    fn get_code(&self, address: &PublicAddress) -> Option<Vec<u8>> {
        if self.frames.is_empty() || self.shard_of(address) != self.shard_of(&self.context_address()) {
            return None;
        }
        self.accounts.get(address).map(|account| account.code.clone())
    }

    fn are_in_same_shard(&self, left: &PublicAddress, right: &PublicAddress) -> bool {
        self.shard_of(left) == self.shard_of(right)
    }

    fn is_builtin_function_name(&self, name: &str) -> bool {
        matches!(name, ESDT_TRANSFER | ESDT_NFT_TRANSFER | MULTI_ESDT_NFT_TRANSFER)
    }
}

impl VmHost for SimulateChain {
    fn execute_on_dest_context(
        &mut self,
        async_ctx: &mut AsyncContext,
        input: ContractCallInput,
    ) -> Result<NestedOutcome, AsyncError> {
        self.use_gas(input.gas_provided);

        if self.is_builtin_function_name(&input.function) {
            let vm_output = self.run_builtin_function(&input)?;
            self.restore_gas(vm_output.gas_remaining);
            if vm_output.return_code.is_ok() {
                self.merge_output_accounts(&vm_output);
            }
            return Ok(NestedOutcome {
                vm_output,
                is_complete: true,
            });
        }

        let parent_address = self.context_address();
        async_ctx.enter_nested(&input, parent_address)?;
        let function = input.function.clone();
        self.frames.push(Frame::new(self.schedule, input));

        let result = self
            .call_sc_function(async_ctx, &function)
            .and_then(|_| async_ctx.execute(self));
        let frame = self.frames.pop().expect("nested frame");
        let vm_output = match result {
            Ok(()) => {
                let mut vm_output = frame.output;
                vm_output.gas_remaining = frame.meter.gas_left();
                vm_output
            }
            Err(e) => VmOutput::failure(e.return_code(), e.to_string()),
        };

        let exit = async_ctx.leave_nested(self, &vm_output)?;
        if !exit.was_async_call || exit.is_complete {
            self.restore_gas(vm_output.gas_remaining);
        }
        if vm_output.return_code.is_ok() {
            self.merge_output_accounts(&vm_output);
        }
        Ok(NestedOutcome {
            vm_output,
            is_complete: exit.is_complete,
        })
    }

    fn call_sc_function(
        &mut self,
        async_ctx: &mut AsyncContext,
        function: &str,
    ) -> Result<(), AsyncError> {
        let input = self.frame().input.clone();
        self.executed.push(ContractCallInput {
            function: function.to_string(),
            ..input.clone()
        });

        // The receiving half of a token transfer runs the call it carries, if any.
        if self.is_builtin_function_name(function) {
            let parsed = BuiltinEsdtTransferParser.parse_esdt_transfers(
                &input.caller,
                &input.recipient,
                function,
                &input.arguments,
            )?;
            if parsed.call_function.is_empty() {
                return Ok(());
            }
            self.frame_mut().input.arguments = parsed.call_args;
            return self.call_sc_function(async_ctx, &parsed.call_function);
        }

        match self.contract_function(&input.recipient, function) {
            Some(contract_function) => contract_function(self, async_ctx),
            None => Err(AsyncError::ExecutionFailed {
                code: ReturnCode::FunctionNotFound,
                message: format!("{function} not found"),
            }),
        }
    }
}
