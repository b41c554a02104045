//! Server-side evaluation of a guarded transaction.
//!
//! `ARGV[1]` is the JSON encoding of a [`Transaction`]; `KEYS` lists every key
//! it touches. The script:
//!
//! 1. rejects unknown guard/mutation kinds and non-numeric counters before
//!    anything is written
//! 2. evaluates the guards in order and returns the 1-based index of the
//!    first one that fails
//! 3. otherwise applies every mutation and returns `0`
//!
//! Redis runs a script without interleaving other commands, which is what
//! makes the batch atomic.
//!
//! [`Transaction`]: ticket_gate_core::store::Transaction

pub(crate) const GUARDED_TRANSACTION: &str = r"
local plan = cjson.decode(ARGV[1])

local function int(n)
  return string.format('%d', n)
end

local function counter(key)
  local raw = redis.call('GET', key)
  if not raw then
    return 0
  end
  local n = tonumber(raw)
  if not n then
    error('non-numeric counter at ' .. key)
  end
  return n
end

local function holds(g)
  local kind = g.kind
  if kind == 'counter_at_least' then
    return counter(g.key) >= g.min
  elseif kind == 'cardinality_below' then
    return redis.call('ZCARD', g.key) < g.limit
  elseif kind == 'member_present' then
    return redis.call('ZSCORE', g.key, g.member) ~= false
  elseif kind == 'member_absent' then
    return redis.call('ZSCORE', g.key, g.member) == false
  elseif kind == 'score_at_most' then
    local score = redis.call('ZSCORE', g.key, g.member)
    return score ~= false and tonumber(score) <= g.max
  elseif kind == 'list_empty' then
    return redis.call('LLEN', g.key) == 0
  elseif kind == 'list_head_equals' then
    return redis.call('LINDEX', g.key, 0) == g.member
  elseif kind == 'value_equals' then
    local current = redis.call('GET', g.key)
    if g.expected == nil then
      return current == false
    end
    return current == g.expected
  end
  error('unknown guard kind: ' .. tostring(kind))
end

local known_mutations = {
  set = true, delete = true, increment_by = true,
  sorted_set_add = true, sorted_set_remove = true,
  list_push_back = true, list_pop_front = true, list_remove = true,
}

for _, m in ipairs(plan.mutations) do
  if not known_mutations[m.kind] then
    error('unknown mutation kind: ' .. tostring(m.kind))
  end
  if m.kind == 'increment_by' then
    counter(m.key)
  end
end

for i, g in ipairs(plan.guards) do
  if not holds(g) then
    return i
  end
end

for _, m in ipairs(plan.mutations) do
  local kind = m.kind
  if kind == 'set' then
    if m.ttl_ms then
      redis.call('SET', m.key, m.value, 'PX', int(m.ttl_ms))
    else
      redis.call('SET', m.key, m.value)
    end
  elseif kind == 'delete' then
    redis.call('DEL', m.key)
  elseif kind == 'increment_by' then
    if m.ceiling == nil or counter(m.key) + m.delta <= m.ceiling then
      redis.call('INCRBY', m.key, int(m.delta))
    end
  elseif kind == 'sorted_set_add' then
    redis.call('ZADD', m.key, int(m.score), m.member)
  elseif kind == 'sorted_set_remove' then
    redis.call('ZREM', m.key, m.member)
  elseif kind == 'list_push_back' then
    redis.call('RPUSH', m.key, m.member)
  elseif kind == 'list_pop_front' then
    redis.call('LPOP', m.key)
  elseif kind == 'list_remove' then
    redis.call('LREM', m.key, 0, m.member)
  end
end

return 0
";
