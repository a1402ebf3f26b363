mod failure_e2e;
mod function_calling_e2e;
mod providers;
mod streaming_e2e;
