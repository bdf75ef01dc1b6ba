pub(crate) mod mpesa_handlers;
