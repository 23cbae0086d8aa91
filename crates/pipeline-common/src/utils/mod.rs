mod test_tracing;
