//! Lua scripts run with EVAL.
//!
//! Key layout for queue `q` in namespace `ns`:
//! - `ns:q:Q`      hash with the queue config, counters, the last id
//!                 timestamp and per-message fields `<id>` (payload),
//!                 `<id>:rc`, `<id>:fr`, `<id>:ea`
//! - `ns:q`        sorted set of un-leased message ids scored by eligible ms
//! - `ns:q:leased` sorted set of leased message ids scored by lease expiry ms
//! - `ns::QUEUES`  set of queue names; queue names never contain `:` and
//!                 are never empty, so no queue key can take this name
//!
//! Every script reads the server clock itself, so a single EVAL is the
//! whole operation. Scripts that call `TIME` and then write need effect
//! replication, which `redis.replicate_commands()` turns on before Redis 5
//! and which is the only mode from Redis 7.

/// Sets `now` to the server time in milliseconds and `micros` to microseconds
macro_rules! server_time {
    () => {
        r#"
redis.replicate_commands()
local t = redis.call('TIME')
local micros = tonumber(t[1]) * 1000000 + tonumber(t[2])
local now = math.floor(micros / 1000)
local function num(n)
    return string.format('%.0f', n)
end
"#
    };
}

/// Defines `attributes()` over KEYS ready, leased, hash at `now`
macro_rules! queue_attributes {
    () => {
        r#"
local function attributes()
    local c = redis.call('HMGET', KEYS[3], 'vt', 'delay', 'maxsize', 'created', 'modified',
        'totalrecv', 'totalsent')
    local msgs = redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[2])
    local hidden = redis.call('ZCOUNT', KEYS[1], '(' .. num(now), '+inf')
        + redis.call('ZCOUNT', KEYS[2], '(' .. num(now), '+inf')
    local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', num(now))
    for _, id in ipairs(expired) do
        local ea = redis.call('HGET', KEYS[3], id .. ':ea')
        if ea and tonumber(ea) > now then
            hidden = hidden + 1
        end
    end
    return {tonumber(c[1]), tonumber(c[2]), tonumber(c[3]), tonumber(c[4]), tonumber(c[5]),
        tonumber(c[6]) or 0, tonumber(c[7]) or 0, msgs, hidden}
end
"#
    };
}

/// KEYS: hash, queues set. ARGV: vt, delay, maxsize, name.
/// Returns the creation time in seconds, or -1 if the queue exists.
pub(super) const CREATE_QUEUE: &str = concat!(
    server_time!(),
    r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return -1
end
redis.call('HSET', KEYS[1],
    'vt', ARGV[1], 'delay', ARGV[2], 'maxsize', ARGV[3],
    'created', t[1], 'modified', t[1],
    'totalrecv', 0, 'totalsent', 0)
redis.call('SADD', KEYS[2], ARGV[4])
return tonumber(t[1])
"#
);

/// KEYS: ready, leased, hash. ARGV: vt, delay, maxsize (empty = unchanged).
/// Returns the attributes after the change, or {} if the queue is missing.
pub(super) const UPDATE_QUEUE: &str = concat!(
    server_time!(),
    queue_attributes!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return {}
end
if ARGV[1] ~= '' then redis.call('HSET', KEYS[3], 'vt', ARGV[1]) end
if ARGV[2] ~= '' then redis.call('HSET', KEYS[3], 'delay', ARGV[2]) end
if ARGV[3] ~= '' then redis.call('HSET', KEYS[3], 'maxsize', ARGV[3]) end
redis.call('HSET', KEYS[3], 'modified', t[1])
return attributes()
"#
);

/// KEYS: ready, leased, hash.
/// Returns {vt, delay, maxsize, created, modified, totalrecv, totalsent,
/// msgs, hiddenmsgs} or {} if the queue is missing.
pub(super) const QUEUE_ATTRIBUTES: &str = concat!(
    server_time!(),
    queue_attributes!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return {}
end
return attributes()
"#
);

/// KEYS: hash, ready, leased, queues set. ARGV: name.
pub(super) const DELETE_QUEUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
redis.call('SREM', KEYS[4], ARGV[1])
return 1
"#;

/// KEYS: ready, leased, hash. ARGV: id suffix, payload, delay (empty = queue
/// default), realtime channel (empty = none).
///
/// The id is ten base-36 digits of the send time in microseconds, kept
/// strictly increasing per queue through the `lastid` field, then the
/// suffix. Replies {'missing'}, {'toolarge', size, maxsize} or
/// {'ok', id, depth}.
pub(super) const SEND_MESSAGE: &str = concat!(
    server_time!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return {'missing'}
end
local cfg = redis.call('HMGET', KEYS[3], 'delay', 'maxsize', 'lastid')
local maxsize = tonumber(cfg[2])
if maxsize and maxsize >= 0 and #ARGV[2] > maxsize then
    return {'toolarge', tostring(#ARGV[2]), cfg[2]}
end
local last = tonumber(cfg[3])
if last and micros <= last then
    micros = last + 1
end
redis.call('HSET', KEYS[3], 'lastid', num(micros))
local alphabet = '0123456789abcdefghijklmnopqrstuvwxyz'
local digits = {}
local n = micros
for i = 10, 1, -1 do
    local r = n % 36
    digits[i] = string.sub(alphabet, r + 1, r + 1)
    n = (n - r) / 36
end
local id = table.concat(digits) .. ARGV[1]
local delay = tonumber(ARGV[3]) or tonumber(cfg[1]) or 0
local ea = num(math.floor(micros / 1000) + delay * 1000)
redis.call('ZADD', KEYS[1], ea, id)
redis.call('HSET', KEYS[3], id, ARGV[2], id .. ':ea', ea)
redis.call('HINCRBY', KEYS[3], 'totalsent', 1)
local depth = redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[2])
if ARGV[4] ~= '' then
    redis.call('PUBLISH', ARGV[4], depth)
end
return {'ok', id, tostring(depth)}
"#
);

/// KEYS: ready, leased, hash. ARGV: vt (empty = queue default), mode
/// (`lease` or `remove`).
///
/// Folds expired leases back into the ready set, then takes the lowest
/// eligible message. Replies {'missing'}, {'empty'} or
/// {'ok', id, payload, rc, fr, ea, lease}.
pub(super) const CLAIM_MESSAGE: &str = concat!(
    server_time!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return {'missing'}
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', num(now))
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[2], id)
    local ea = redis.call('HGET', KEYS[3], id .. ':ea')
    if ea then
        redis.call('ZADD', KEYS[1], ea, id)
    end
end
local msg = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', num(now), 'LIMIT', 0, 1)
if #msg == 0 then
    return {'empty'}
end
local id = msg[1]
if redis.call('ZSCORE', KEYS[2], id) then
    return redis.error_reply('message ' .. id .. ' is already leased')
end
local body = redis.call('HGET', KEYS[3], id)
if not body then
    return redis.error_reply('message ' .. id .. ' has no payload')
end
redis.call('ZREM', KEYS[1], id)
redis.call('HINCRBY', KEYS[3], 'totalrecv', 1)
local rc = redis.call('HINCRBY', KEYS[3], id .. ':rc', 1)
local fr = redis.call('HGET', KEYS[3], id .. ':fr')
if not fr then
    fr = num(now)
    redis.call('HSET', KEYS[3], id .. ':fr', fr)
end
local ea = redis.call('HGET', KEYS[3], id .. ':ea')
local lease = ''
if ARGV[2] == 'remove' then
    redis.call('HDEL', KEYS[3], id, id .. ':rc', id .. ':fr', id .. ':ea')
else
    local vt = tonumber(ARGV[1]) or tonumber(redis.call('HGET', KEYS[3], 'vt')) or 0
    lease = num(now + vt * 1000)
    redis.call('ZADD', KEYS[2], lease, id)
end
return {'ok', id, body, tostring(rc), fr, ea, lease}
"#
);

/// KEYS: ready, leased, hash. ARGV: instant in ms (empty = server time).
/// Same reply shape as CLAIM_MESSAGE, without writing anything.
pub(super) const PEEK_MESSAGE: &str = concat!(
    server_time!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return {'missing'}
end
local at = tonumber(ARGV[1]) or now
local best, best_ea, best_lease
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', num(at), 'WITHSCORES', 'LIMIT', 0, 1)
if #ready > 0 then
    best = ready[1]
    best_ea = tonumber(ready[2])
    best_lease = ''
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', num(at), 'WITHSCORES')
for i = 1, #expired, 2 do
    local id = expired[i]
    local ea = tonumber(redis.call('HGET', KEYS[3], id .. ':ea'))
    if ea and ea <= at and (best == nil or ea < best_ea or (ea == best_ea and id < best)) then
        best = id
        best_ea = ea
        best_lease = expired[i + 1]
    end
end
if best == nil then
    return {'empty'}
end
local body = redis.call('HGET', KEYS[3], best)
if not body then
    return redis.error_reply('message ' .. best .. ' has no payload')
end
local rc = redis.call('HGET', KEYS[3], best .. ':rc') or '0'
local fr = redis.call('HGET', KEYS[3], best .. ':fr') or ''
local ea = redis.call('HGET', KEYS[3], best .. ':ea')
return {'ok', best, body, rc, fr, ea, best_lease}
"#
);

/// KEYS: ready, leased, hash. ARGV: id, vt seconds.
/// Returns 1 if set, 0 if the message is unknown, -1 if the queue is missing.
pub(super) const SET_LEASE: &str = concat!(
    server_time!(),
    r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return -1
end
if redis.call('HEXISTS', KEYS[3], ARGV[1]) == 0 then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], num(now + tonumber(ARGV[2]) * 1000), ARGV[1])
return 1
"#
);

/// KEYS: ready, leased, hash. ARGV: id.
/// Returns 1 if removed, 0 if unknown, -1 if the queue is missing.
pub(super) const DELETE_MESSAGE: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
    return -1
end
local removed = redis.call('HDEL', KEYS[3], ARGV[1], ARGV[1] .. ':rc', ARGV[1] .. ':fr', ARGV[1] .. ':ea')
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
if removed > 0 then
    return 1
end
return 0
"#;
